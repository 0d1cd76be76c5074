//! Core data models for stored configuration and collected inventories.
//!
//! Configuration records only ever hold secrets as cipher tokens; inventory
//! items are plain metadata produced by the dual-source connector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a stored configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    /// Direct connection to a backing database
    DatabaseConnection,
    /// Credentials for a remote instance reached over its API
    RemoteInstance,
}

impl ConfigKind {
    /// Stable identifier used by backing stores and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKind::DatabaseConnection => "database_connection",
            ConfigKind::RemoteInstance => "remote_instance",
        }
    }

    /// Fields that must be present (and non-blank) before a record is saved.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            ConfigKind::DatabaseConnection => &["db_type", "host", "database", "username"],
            ConfigKind::RemoteInstance => &["url", "database", "username"],
        }
    }
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfigKind {
    type Err = crate::error::DbVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "database_connection" | "database" | "db" => Ok(ConfigKind::DatabaseConnection),
            "remote_instance" | "remote" | "instance" => Ok(ConfigKind::RemoteInstance),
            other => Err(crate::error::DbVaultError::configuration(format!(
                "Unknown configuration kind: {}",
                other
            ))),
        }
    }
}

/// A named, persisted configuration entry.
///
/// # Security
/// `encrypted_secret` is a cipher token (or a legacy plaintext value awaiting
/// re-encryption). `Debug` never prints it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    /// Unique key
    pub name: String,
    /// What the record connects to
    pub kind: ConfigKind,
    /// Non-secret settings (host, database, username, url, ...)
    pub fields: BTreeMap<String, String>,
    /// Cipher token, or a legacy plaintext value
    pub encrypted_secret: String,
    /// False once deactivated; inactive records are hidden from reads
    pub active: bool,
    /// First save
    pub created_at: DateTime<Utc>,
    /// Last save or deactivation
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("encrypted_secret", &"<redacted>")
            .field("active", &self.active)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl ConfigRecord {
    /// Returns a non-blank field value.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Which acquisition channel produced an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Remote-API channel
    Api,
    /// Direct-introspection channel
    Introspection,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Api => write!(f, "API"),
            SourceKind::Introspection => write!(f, "introspection"),
        }
    }
}

/// Entity families collected from a remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Installed application module
    Module,
    /// Access group or database role
    Role,
    /// Database table or model
    Table,
    /// System configuration parameter
    Property,
    /// Scheduled background job
    ScheduledJob,
}

impl EntityType {
    /// Every entity type, in collection order.
    pub const ALL: [EntityType; 5] = [
        EntityType::Module,
        EntityType::Role,
        EntityType::Table,
        EntityType::Property,
        EntityType::ScheduledJob,
    ];

    /// Stable identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Module => "module",
            EntityType::Role => "role",
            EntityType::Table => "table",
            EntityType::Property => "property",
            EntityType::ScheduledJob => "scheduled_job",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entity reported by one of the two channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Channel that reported the entity
    pub source: SourceKind,
    /// Kind of entity
    pub entity_type: EntityType,
    /// Technical name
    pub name: String,
    /// Extra descriptive values compared during correlation
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl InventoryItem {
    /// Creates an item without attributes.
    pub fn new(source: SourceKind, entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            source,
            entity_type,
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder method to add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
