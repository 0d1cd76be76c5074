//! Configuration types for the vault, validator, rate limiter and connector.
//!
//! Every struct has secure defaults, builder methods and a `validate()`.
//! [`Settings`] aggregates them and can be loaded from a JSON file.
//!
//! # Security
//! These configuration structs never hold secrets. Passphrase components and
//! bootstrap credentials are read separately through [`EnvironmentInputs`].

mod environment;

pub use environment::EnvironmentInputs;

use crate::error::DbVaultError;
use crate::security::KdfParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the record the vault treats as the default connection.
pub const DEFAULT_RECORD_NAME: &str = "default";

/// Settings for the configuration vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Record resolved as the active connection on reload
    pub default_record_name: String,
    /// Argon2id parameters for the vault key
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            default_record_name: DEFAULT_RECORD_NAME.to_string(),
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    /// Validates vault settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.default_record_name.trim().is_empty() {
            return Err(DbVaultError::configuration(
                "default_record_name cannot be empty",
            ));
        }
        self.kdf.validate()
    }

    /// Builder method to set the default record name.
    pub fn with_default_record_name(mut self, name: impl Into<String>) -> Self {
        self.default_record_name = name.into();
        self
    }
}

/// Settings for the connection validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Hostname suffixes considered known-good; other hosts produce a warning
    pub trusted_host_suffixes: Vec<String>,
    /// Passwords shorter than this produce a warning
    pub min_password_length: usize,
    /// Passwords at least this long earn the length point of the score
    pub strong_password_length: usize,
    /// Known weak passwords (compared case-insensitively)
    pub weak_passwords: Vec<String>,
    /// Reachability probe timeout in seconds
    pub probe_timeout_secs: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            trusted_host_suffixes: [
                "localhost",
                "127.0.0.1",
                "::1",
                ".local",
                ".internal",
                ".odoo.com",
                ".odoo.sh",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            min_password_length: 8,
            strong_password_length: 12,
            weak_passwords: [
                "password", "password1", "123456", "12345678", "123456789", "qwerty", "admin",
                "administrator", "root", "toor", "letmein", "welcome", "changeme", "secret",
                "odoo", "postgres", "test", "guest", "default", "abc123",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            probe_timeout_secs: 10,
        }
    }
}

impl ValidatorConfig {
    /// Validates validator settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_password_length == 0 {
            return Err(DbVaultError::configuration(
                "min_password_length must be greater than 0",
            ));
        }
        if self.strong_password_length < self.min_password_length {
            return Err(DbVaultError::configuration(
                "strong_password_length must be at least min_password_length",
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(DbVaultError::configuration(
                "probe_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Reachability probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Builder method to replace the trusted hostname suffixes.
    pub fn with_trusted_host_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trusted_host_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }
}

/// Sliding-window limits for outbound validation and test calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Calls admitted per window
    pub max_requests: usize,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Validates rate limit settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_requests == 0 {
            return Err(DbVaultError::configuration(
                "max_requests must be greater than 0",
            ));
        }
        if self.window_secs == 0 {
            return Err(DbVaultError::configuration(
                "window_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Timeouts for the dual-source connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Per-channel connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-channel extraction timeout in seconds
    pub extraction_timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            extraction_timeout_secs: 120,
        }
    }
}

impl ConnectorConfig {
    /// Validates connector settings.
    pub fn validate(&self) -> crate::Result<()> {
        if self.connect_timeout_secs == 0 {
            return Err(DbVaultError::configuration(
                "connect_timeout_secs must be greater than 0",
            ));
        }
        if self.extraction_timeout_secs == 0 {
            return Err(DbVaultError::configuration(
                "extraction_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Extraction timeout.
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

/// All settings, as loaded from a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// `vault` section
    pub vault: VaultConfig,
    /// `validator` section
    pub validator: ValidatorConfig,
    /// `rate_limit` section
    pub rate_limit: RateLimitConfig,
    /// `connector` section
    pub connector: ConnectorConfig,
}

impl Settings {
    /// Validates every section.
    pub fn validate(&self) -> crate::Result<()> {
        self.vault.validate()?;
        self.validator.validate()?;
        self.rate_limit.validate()?;
        self.connector.validate()
    }

    /// Loads and validates settings from a JSON file.
    ///
    /// Missing sections and fields take their defaults; unknown fields are
    /// rejected.
    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DbVaultError::io(format!("Failed to read settings file {}", path.display()), e)
        })?;
        let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
            DbVaultError::serialization(
                format!("Invalid settings file {}", path.display()),
                e,
            )
        })?;
        settings.validate()?;
        Ok(settings)
    }
}
