//! Username checks and password strength scoring.

use super::patterns::ValidationPatterns;
use super::{ConnectionValidator, CredentialValidation, ValidationResult};

const MAX_USERNAME_LENGTH: usize = 64;

impl ConnectionValidator {
    /// Validates a username and scores a password.
    ///
    /// The score awards one point each for length, a lowercase letter, an
    /// uppercase letter, a digit and a symbol. Weak or short passwords are
    /// warnings only; malformed usernames are errors.
    pub fn validate_credentials(&self, username: &str, password: &str) -> CredentialValidation {
        let patterns = ValidationPatterns::instance();
        let mut result = ValidationResult::new();
        let username = username.trim();

        if username.is_empty() {
            result.add_error("Username is required");
        } else {
            if username.chars().count() > MAX_USERNAME_LENGTH {
                result.add_error(format!(
                    "Username must be at most {} characters",
                    MAX_USERNAME_LENGTH
                ));
            }
            if !patterns.username.is_match(username) {
                result.add_error("Username contains invalid characters");
            }
        }

        let security_score = self.password_score(password);
        let length = password.chars().count();

        if password.is_empty() {
            result.add_warning("No password provided");
        } else {
            if length < self.config.min_password_length {
                result.add_warning(format!(
                    "Password is shorter than {} characters",
                    self.config.min_password_length
                ));
            }
            if self
                .config
                .weak_passwords
                .iter()
                .any(|weak| weak.eq_ignore_ascii_case(password))
            {
                result.add_warning("Password is a commonly used password");
            }
            if !username.is_empty() && password.eq_ignore_ascii_case(username) {
                result.add_warning("Password matches the username");
            }
            if security_score < 3 {
                result.add_warning(format!("Password strength is weak ({}/5)", security_score));
            }
        }

        CredentialValidation {
            result,
            security_score,
        }
    }

    fn password_score(&self, password: &str) -> u8 {
        let checks = [
            password.chars().count() >= self.config.strong_password_length,
            password.chars().any(|c| c.is_lowercase()),
            password.chars().any(|c| c.is_uppercase()),
            password.chars().any(|c| c.is_ascii_digit()),
            password
                .chars()
                .any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
        ];
        checks.iter().fold(0u8, |score, passed| {
            if *passed { score.saturating_add(1) } else { score }
        })
    }
}
