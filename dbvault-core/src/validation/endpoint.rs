//! URL validation for remote-instance endpoints.

use super::patterns::ValidationPatterns;
use super::{ConnectionValidator, ValidationResult};
use crate::error::redact_database_url;
use url::Url;

/// Characters removed from the sanitized form, alongside control characters.
const STRIPPED_CHARS: &[char] = &['<', '>', '"', '\'', '`', '{', '}', '|', '\\', '^'];

impl ConnectionValidator {
    /// Validates a remote-instance URL.
    ///
    /// # Errors reported
    /// - Missing or non-HTTP(S) scheme, missing host
    /// - Script markers, embedded SQL or control characters
    ///
    /// # Warnings reported
    /// - Host outside the trusted suffix allow-list
    /// - Plain HTTP to a non-local host
    /// - Credentials embedded in the URL
    pub fn validate_url(&self, url: &str) -> ValidationResult {
        let patterns = ValidationPatterns::instance();
        let mut result = ValidationResult::new();
        let trimmed = url.trim();

        if trimmed.is_empty() {
            result.add_error("URL is required");
            return result;
        }

        if patterns.has_control_chars(trimmed) {
            result.add_error("URL contains control characters");
        }
        if patterns.has_script_marker(trimmed) {
            result.add_error("URL contains a script injection marker");
        }
        if patterns.has_embedded_sql(trimmed) {
            result.add_error("URL contains embedded SQL");
        }

        let sanitized = sanitize_url(trimmed);
        let parsed = Url::parse(&sanitized);
        result.sanitized = redacted_form(sanitized, parsed.as_ref().ok());

        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                result.add_error(format!("Invalid URL format: {}", e));
                return result;
            }
        };

        match parsed.scheme() {
            "http" | "https" => {}
            other => result.add_error(format!("Unsupported URL scheme: {}", other)),
        }

        let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
            result.add_error("URL must include a host");
            return result;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();

        if !self.is_trusted_host(&host) {
            result.add_warning(format!("Host {} is not in the trusted hostname list", host));
        }
        if parsed.scheme() == "http" && !is_local_host(&host) {
            result.add_warning("URL uses unencrypted HTTP for a remote host");
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            result.add_warning("URL embeds credentials; store them as a secret instead");
        }

        result
    }

    /// True when `host` matches one of the trusted suffixes.
    ///
    /// Suffixes starting with `.` match the bare domain and any subdomain;
    /// other entries match exactly or as a parent domain.
    pub(crate) fn is_trusted_host(&self, host: &str) -> bool {
        self.config.trusted_host_suffixes.iter().any(|suffix| {
            let suffix = suffix.to_ascii_lowercase();
            match suffix.strip_prefix('.') {
                Some(domain) => host == domain || host.ends_with(&suffix),
                None => host == suffix || host.ends_with(&format!(".{}", suffix)),
            }
        })
    }
}

/// Loopback and single-label hosts are treated as local.
pub(crate) fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
        || host.starts_with("127.")
        || host.ends_with(".localhost")
        || host.ends_with(".local")
}

/// Sanitized form safe to echo: passwords are masked, and input whose
/// userinfo cannot be located is withheld when it may carry one.
fn redacted_form(sanitized: String, parsed: Option<&Url>) -> Option<String> {
    match parsed {
        Some(url) if url.password().is_some() => Some(redact_database_url(url.as_str())),
        Some(url) if url.has_host() => Some(sanitized),
        _ if sanitized.contains('@') => None,
        _ => Some(sanitized),
    }
}

fn sanitize_url(url: &str) -> String {
    let patterns = ValidationPatterns::instance();
    let without_controls = patterns.control_chars.replace_all(url, "");
    without_controls
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}
