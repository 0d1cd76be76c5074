//! Deny-list and allow-list validation of URLs, connection strings,
//! credentials and introspection queries.
//!
//! Deny-list patterns catch injection attempts; allow-list grammars catch
//! unexpected shapes. Every check returns a [`ValidationResult`] value:
//! errors block the caller, warnings never do.
//!
//! # Example
//! ```rust
//! use dbvault_core::validation::ConnectionValidator;
//!
//! let validator = ConnectionValidator::default();
//!
//! let outcome = validator.validate_connection_string("postgresql://user:pw@localhost:5432/db");
//! assert!(outcome.result.valid);
//! assert_eq!(outcome.db_type(), Some("postgresql"));
//!
//! assert!(!validator.validate_query("DROP TABLE accounts;").valid);
//! assert!(!validator.validate_url("https://host/<script>").valid);
//! ```

mod connection;
mod credentials;
mod endpoint;
mod patterns;
mod query;

pub use query::{ReadOnlyQuery, validate_query};

use crate::config::ValidatorConfig;
use crate::rate_limit::RateLimiter;
use crate::security::{BackendFamily, ConnectionDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of a single validation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when no errors were recorded
    pub valid: bool,
    /// Blocking findings
    pub errors: Vec<String>,
    /// Non-blocking findings
    pub warnings: Vec<String>,
    /// Cleaned-up form of the input, when one can be produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// Creates an empty, valid result.
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            sanitized: None,
        }
    }

    /// Records a blocking error.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    /// Records a non-blocking warning.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Converts the result into `Err(Validation)` when it is invalid.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(crate::error::DbVaultError::validation(self.errors))
        }
    }
}

/// Outcome of connection-string validation.
#[derive(Debug, Clone)]
pub struct ConnectionValidation {
    /// Errors and warnings for the connection string
    pub result: ValidationResult,
    /// Classified backend family, when the scheme is recognized
    pub backend: Option<BackendFamily>,
    /// Parsed descriptor, when the string could be parsed
    pub descriptor: Option<ConnectionDescriptor>,
}

impl ConnectionValidation {
    /// Canonical backend identifier (`postgresql`, `mysql`, ...).
    pub fn db_type(&self) -> Option<&'static str> {
        self.backend.map(BackendFamily::as_str)
    }

    /// Returns the descriptor of a valid connection string.
    pub fn into_descriptor(self) -> crate::Result<ConnectionDescriptor> {
        self.result.into_result()?;
        self.descriptor.ok_or_else(|| {
            crate::error::DbVaultError::validation(vec![
                "Connection string could not be parsed".to_string(),
            ])
        })
    }
}

/// Outcome of credential validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialValidation {
    /// Errors and warnings for the credential pair
    #[serde(flatten)]
    pub result: ValidationResult,
    /// Password strength from 0 to 5
    pub security_score: u8,
}

/// Stateless validator for connection targets and queries.
///
/// The only shared state is an optional [`RateLimiter`] that guards live
/// reachability probes.
#[derive(Debug, Clone, Default)]
pub struct ConnectionValidator {
    config: ValidatorConfig,
    limiter: Option<Arc<RateLimiter>>,
}

impl ConnectionValidator {
    /// Creates a validator from validated settings.
    pub fn new(config: ValidatorConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            limiter: None,
        })
    }

    /// Builder method to guard live probes with a shared rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Active settings.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates a query for execution on an introspection channel.
    ///
    /// This is a hard gate: the query is never rewritten.
    pub fn validate_query(&self, query: &str) -> ValidationResult {
        validate_query(query)
    }
}
