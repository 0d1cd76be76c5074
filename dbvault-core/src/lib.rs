//! Core library for DBVault.
//!
//! DBVault keeps named database and remote-instance configurations with
//! encrypted secrets, validates every connection target before it is dialed,
//! and reconciles the inventory a remote API reports with what direct
//! database introspection finds.
//!
//! # Security Guarantees
//! - Secrets are stored only as AES-GCM tokens under an Argon2id-derived key
//! - Secrets and connection passwords are redacted from every `Debug` output
//! - Connection targets pass the allow-list grammar and deny-list before use
//! - Introspection executes only validated read-only queries
//!
//! # Architecture
//! - [`vault`]: configuration records over a pluggable backing store
//! - [`validation`]: URL, connection-string, credential and query validation
//! - [`connector`]: the two acquisition channels and the hybrid inventory
//! - [`correlation`]: pure reconciliation of the two inventories

pub mod config;
pub mod connector;
pub mod correlation;
#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
mod driver;
pub mod error;
pub mod logging;
pub mod models;
pub mod rate_limit;
pub mod security;
pub mod validation;
pub mod vault;

// Re-export commonly used types
pub use config::{
    ConnectorConfig, EnvironmentInputs, RateLimitConfig, Settings, ValidatorConfig, VaultConfig,
};
pub use connector::{
    ApiChannel, ApiProbe, DualSourceConnector, EstablishReport, HybridResult,
    IntrospectionCatalog, IntrospectionChannel,
};
pub use correlation::{CorrelationEngine, CorrelationResult, EntityName};
pub use error::{DbVaultError, Result};
pub use models::{ConfigKind, ConfigRecord, EntityType, InventoryItem, SourceKind};
pub use rate_limit::RateLimiter;
pub use security::{ConnectionDescriptor, DecryptedSecret, KeyDeriver, SecretCipher};
pub use validation::{ConnectionValidator, ValidationResult};
pub use vault::{ConfigDraft, ConfigStore, ConfigVault, ConnectionState, ReloadOutcome};
