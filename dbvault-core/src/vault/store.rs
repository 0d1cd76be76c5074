//! Backing-store contract for configuration records.

use crate::Result;
use crate::models::ConfigRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Persistence for [`ConfigRecord`] values, keyed by name.
///
/// The vault requires upsert-by-name, select-by-name and select-all-active;
/// `list_all` and `delete` back the administrative operations.
///
/// # Security
/// Implementations receive records whose secret is already a cipher token
/// and must store `encrypted_secret` as an opaque value.
///
/// # Object Safety
/// This trait is object-safe, so the vault holds an `Arc<dyn ConfigStore>`.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Inserts the record, or replaces the record with the same name.
    async fn upsert(&self, record: &ConfigRecord) -> Result<()>;

    /// Looks up a record by name, active or not.
    async fn get(&self, name: &str) -> Result<Option<ConfigRecord>>;

    /// Returns every active record, ordered by name.
    async fn list_active(&self) -> Result<Vec<ConfigRecord>>;

    /// Returns every record, including inactive ones, ordered by name.
    async fn list_all(&self) -> Result<Vec<ConfigRecord>>;

    /// Physically removes a record. Returns false when it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Short description for logs (never contains credentials).
    fn describe(&self) -> String;
}

/// Process-local store, used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    records: RwLock<BTreeMap<String, ConfigRecord>>,
}

impl MemoryConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn upsert(&self, record: &ConfigRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ConfigRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn list_active(&self) -> Result<Vec<ConfigRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ConfigRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(name).is_some())
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}
