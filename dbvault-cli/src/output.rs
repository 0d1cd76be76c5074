//! Rendering and file output for command results.
//!
//! Results are printed as pretty JSON. Stored records go through
//! [`RecordView`] so that ciphertext never reaches the terminal.

use anyhow::Context;
use chrono::{DateTime, Utc};
use dbvault_core::correlation::TypeBreakdown;
use dbvault_core::validation::ConnectionValidation;
use dbvault_core::vault::ReloadOutcome;
use dbvault_core::{
    ConfigKind, ConfigRecord, CorrelationResult, EntityType, InventoryItem, SecretCipher,
    ValidationResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A stored record as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordView {
    /// Record name
    pub name: String,
    /// What the record connects to
    pub kind: ConfigKind,
    /// Non-secret settings
    pub fields: BTreeMap<String, String>,
    /// `encrypted` or `legacy-plaintext`; the value itself is never shown
    pub secret: &'static str,
    /// False once deactivated
    pub active: bool,
    /// First save
    pub created_at: DateTime<Utc>,
    /// Last save or deactivation
    pub updated_at: DateTime<Utc>,
}

impl From<&ConfigRecord> for RecordView {
    fn from(record: &ConfigRecord) -> Self {
        Self {
            name: record.name.clone(),
            kind: record.kind,
            fields: record.fields.clone(),
            secret: if SecretCipher::is_token(&record.encrypted_secret) {
                "encrypted"
            } else {
                "legacy-plaintext"
            },
            active: record.active,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Connection-string validation as shown to the operator.
///
/// The parsed descriptor is reduced to its non-secret parts.
#[derive(Debug, Serialize)]
pub struct ConnectionView<'a> {
    /// Errors and warnings
    #[serde(flatten)]
    pub result: &'a ValidationResult,
    /// Canonical backend identifier
    pub db_type: Option<&'static str>,
    /// Parsed host
    pub host: Option<&'a str>,
    /// Explicit or default port
    pub port: Option<u16>,
    /// Database name or SQLite path
    pub database: Option<&'a str>,
}

impl<'a> From<&'a ConnectionValidation> for ConnectionView<'a> {
    fn from(outcome: &'a ConnectionValidation) -> Self {
        let descriptor = outcome.descriptor.as_ref();
        Self {
            result: &outcome.result,
            db_type: outcome.db_type(),
            host: descriptor.map(|d| d.host.as_str()),
            port: descriptor.and_then(|d| d.effective_port()),
            database: descriptor.map(|d| d.database.as_str()),
        }
    }
}

/// Output of the `correlate` command.
#[derive(Debug, Serialize)]
pub struct CorrelationReport {
    /// Overall comparison
    pub correlation: CorrelationResult,
    /// Counts per entity type
    pub breakdown: BTreeMap<EntityType, TypeBreakdown>,
}

/// Serializes `value` as pretty JSON.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize output")
}

/// One-line description of a reload outcome.
pub fn describe_reload(outcome: &ReloadOutcome) -> String {
    match outcome {
        ReloadOutcome::Swapped { record } => format!("Active connection swapped to '{}'", record),
        ReloadOutcome::Unchanged => "Active connection unchanged".to_string(),
        ReloadOutcome::NoDefault => "No active database connection to load".to_string(),
        ReloadOutcome::Failed(reason) => format!("Reload failed: {}", reason),
    }
}

/// Writes `json` to `path`, or returns it for stdout when `path` is `None`.
pub async fn emit(json: String, path: Option<&Path>) -> anyhow::Result<String> {
    let Some(path) = path else {
        return Ok(json);
    };
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write to {}", path.display()))?;
    tracing::info!("Output written to {}", path.display());
    Ok(format!("Output: {}", path.display()))
}

/// Reads a JSON array of inventory items.
pub async fn read_inventory(path: &Path) -> anyhow::Result<Vec<InventoryItem>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read inventory file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid inventory file {}", path.display()))
}
