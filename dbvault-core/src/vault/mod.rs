//! Encrypted configuration vault.
//!
//! The vault owns every [`ConfigRecord`]. Secrets are encrypted with the
//! [`SecretCipher`] before they reach the backing store, and connection
//! records must pass the [`ConnectionValidator`] before they are saved or
//! made active.
//!
//! # Active connection
//! The vault tracks one active connection descriptor:
//! `Uninitialized -> Bootstrapped -> Reloaded -> Reloaded ...`. It never
//! returns to `Uninitialized`, and a failed reload keeps the last good
//! descriptor. The descriptor and the record cache sit behind one mutex that
//! is never held across an await point, so readers always see either the old
//! or the new descriptor.
//!
//! # Degraded mode
//! When the backing store is unreachable, reads are served from the records
//! last read successfully and a warning is logged on every fallback.

mod store;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use store::{ConfigStore, MemoryConfigStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConfigStore;

use crate::Result;
use crate::config::{EnvironmentInputs, Settings, VaultConfig};
use crate::error::DbVaultError;
use crate::models::{ConfigKind, ConfigRecord};
use crate::security::{
    BackendFamily, ConnectionDescriptor, DecryptedSecret, KeyDeriver, SecretCipher,
};
use crate::validation::ConnectionValidator;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Input to [`ConfigVault::save`].
#[derive(Clone)]
pub struct ConfigDraft {
    /// Unique record name
    pub name: String,
    /// What the record connects to
    pub kind: ConfigKind,
    /// Non-secret settings
    pub fields: BTreeMap<String, String>,
    /// Plaintext secret, encrypted before it is stored
    pub secret: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ConfigDraft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDraft")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("secret", &self.secret.as_ref().map(|_| "****"))
            .finish()
    }
}

impl ConfigDraft {
    /// Creates a draft without fields or secret.
    pub fn new(name: impl Into<String>, kind: ConfigKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: BTreeMap::new(),
            secret: None,
        }
    }

    /// Creates a database-connection draft from a parsed descriptor.
    pub fn from_descriptor(name: impl Into<String>, descriptor: &ConnectionDescriptor) -> Self {
        Self {
            name: name.into(),
            kind: ConfigKind::DatabaseConnection,
            fields: descriptor.to_fields(),
            secret: descriptor
                .credentials
                .password()
                .map(|p| Zeroizing::new(p.to_string())),
        }
    }

    /// Builder method to set a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builder method to set the secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(Zeroizing::new(secret.into()));
        self
    }

    fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn is_file_based(&self) -> bool {
        self.field("db_type")
            .and_then(BackendFamily::from_scheme)
            .is_some_and(BackendFamily::is_file_based)
    }

    fn missing_fields(&self) -> Vec<String> {
        self.kind
            .required_fields()
            .iter()
            .filter(|key| {
                // File-based databases have no host or account.
                !(self.kind == ConfigKind::DatabaseConnection
                    && self.is_file_based()
                    && matches!(**key, "host" | "username"))
            })
            .filter(|key| self.field(key).is_none())
            .map(|key| format!("Missing required field: {}", key))
            .collect()
    }
}

/// Whether a save created or replaced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No record of that name existed
    Inserted,
    /// An existing record was overwritten
    Updated,
}

/// A record together with its decrypted secret.
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Stored record, secret still encrypted
    pub record: ConfigRecord,
    /// Plaintext secret, zeroized on drop
    pub secret: DecryptedSecret,
}

impl ResolvedConfig {
    /// Rebuilds the connection descriptor of a database-connection record.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor> {
        match self.record.kind {
            ConfigKind::DatabaseConnection => {
                ConnectionDescriptor::from_fields(&self.record.fields, Some(self.secret.expose()))
            }
            ConfigKind::RemoteInstance => Err(DbVaultError::configuration(format!(
                "'{}' is a remote instance, not a database connection",
                self.record.name
            ))),
        }
    }
}

/// Public view of the active-connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No descriptor has been loaded yet
    Uninitialized,
    /// Descriptor taken from the environment at startup
    Bootstrapped,
    /// Descriptor taken from the backing store
    Reloaded,
}

/// Result of [`ConfigVault::reload_from_backing_store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The active descriptor now comes from the named record
    Swapped { record: String },
    /// The resolved default matches the active descriptor
    Unchanged,
    /// No active database connection exists in the store
    NoDefault,
    /// The reload failed; the previous descriptor is kept
    Failed(String),
}

enum ActivePointer {
    Uninitialized,
    Bootstrapped(Arc<ConnectionDescriptor>),
    Reloaded {
        record: String,
        descriptor: Arc<ConnectionDescriptor>,
    },
}

impl ActivePointer {
    fn descriptor(&self) -> Option<&Arc<ConnectionDescriptor>> {
        match self {
            ActivePointer::Uninitialized => None,
            ActivePointer::Bootstrapped(descriptor)
            | ActivePointer::Reloaded { descriptor, .. } => Some(descriptor),
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            ActivePointer::Uninitialized => ConnectionState::Uninitialized,
            ActivePointer::Bootstrapped(_) => ConnectionState::Bootstrapped,
            ActivePointer::Reloaded { .. } => ConnectionState::Reloaded,
        }
    }
}

struct VaultState {
    active: ActivePointer,
    /// Records as last read from or written to the store
    cache: BTreeMap<String, ConfigRecord>,
}

/// Store of named configuration records with encrypted secrets.
///
/// Construct one per process and share it (for example in an `Arc`).
pub struct ConfigVault {
    store: Arc<dyn ConfigStore>,
    cipher: SecretCipher,
    validator: ConnectionValidator,
    config: VaultConfig,
    state: Mutex<VaultState>,
}

impl std::fmt::Debug for ConfigVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigVault")
            .field("store", &self.store.describe())
            .field("cipher", &self.cipher)
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl ConfigVault {
    /// Creates a vault over `store`.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cipher: SecretCipher,
        validator: ConnectionValidator,
        config: VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            cipher,
            validator,
            config,
            state: Mutex::new(VaultState {
                active: ActivePointer::Uninitialized,
                cache: BTreeMap::new(),
            }),
        })
    }

    /// Derives the vault key from the environment, self-tests the cipher and
    /// bootstraps the active connection.
    ///
    /// # Errors
    /// Fails when the settings are invalid, key derivation fails, the cipher
    /// self-test fails, or the bootstrap descriptor is rejected.
    pub fn from_environment(
        store: Arc<dyn ConfigStore>,
        environment: &EnvironmentInputs,
        settings: &Settings,
    ) -> Result<Self> {
        settings.validate()?;
        let key = KeyDeriver::new(settings.vault.kdf)?.derive(&environment.key_parts())?;
        let cipher = SecretCipher::new(&key);
        cipher.self_test()?;

        let validator = ConnectionValidator::new(settings.validator.clone())?;
        let vault = Self::new(store, cipher, validator, settings.vault.clone())?;
        vault.bootstrap(environment)?;
        Ok(vault)
    }

    /// Validates, encrypts and upserts a record by name.
    ///
    /// Saving an existing name updates it (and reactivates it). `updated_at`
    /// is strictly increasing per record.
    ///
    /// # Errors
    /// - `Validation` for a blank name, missing required fields or a
    ///   descriptor/URL rejected by the validator
    /// - `Encryption` or `Store` when the record cannot be written
    pub async fn save(&self, draft: ConfigDraft) -> Result<SaveOutcome> {
        let name = draft.name.trim().to_string();
        if name.is_empty() {
            return Err(DbVaultError::validation(vec![
                "Configuration name is required".to_string(),
            ]));
        }

        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(DbVaultError::validation(missing));
        }

        self.validate_draft(&draft)?;

        let secret = draft.secret.as_ref().map_or("", |s| s.as_str());
        let encrypted_secret = self.cipher.encrypt(secret)?;

        let existing = self.store.get(&name).await?;
        let updated_at = next_timestamp(existing.as_ref().map(|r| r.updated_at));
        let outcome = if existing.is_some() {
            SaveOutcome::Updated
        } else {
            SaveOutcome::Inserted
        };

        let record = ConfigRecord {
            name: name.clone(),
            kind: draft.kind,
            fields: draft.fields,
            encrypted_secret,
            active: true,
            created_at: existing.map_or(updated_at, |r| r.created_at),
            updated_at,
        };
        self.store.upsert(&record).await?;
        self.lock().cache.insert(name.clone(), record);

        info!("Saved {} configuration '{}' ({:?})", draft.kind, name, outcome);
        Ok(outcome)
    }

    fn validate_draft(&self, draft: &ConfigDraft) -> Result<()> {
        let result = match draft.kind {
            ConfigKind::DatabaseConnection => {
                let connection_string = ConnectionDescriptor::connection_string_from_fields(
                    &draft.fields,
                    draft.secret.as_ref().map(|s| s.as_str()),
                )?;
                self.validator
                    .validate_connection_string(&connection_string)
                    .result
            }
            ConfigKind::RemoteInstance => self
                .validator
                .validate_url(draft.field("url").unwrap_or_default()),
        };

        for warning in &result.warnings {
            warn!("Configuration '{}': {}", draft.name.trim(), warning);
        }
        result.into_result().map(|_| ())
    }

    /// Returns an active record with its decrypted secret.
    ///
    /// Absent and inactive records are `None`.
    ///
    /// # Errors
    /// Returns `Encryption` when the stored token is corrupted.
    pub async fn get(&self, name: &str) -> Result<Option<ResolvedConfig>> {
        let record = match self.store.get(name).await {
            Ok(record) => {
                let mut state = self.lock();
                match &record {
                    Some(record) => {
                        state.cache.insert(record.name.clone(), record.clone());
                    }
                    None => {
                        state.cache.remove(name);
                    }
                }
                record
            }
            Err(e) => {
                warn!(
                    "Backing store unreachable ({}); serving cached '{}'",
                    e, name
                );
                self.lock().cache.get(name).cloned()
            }
        };

        let Some(record) = record.filter(|r| r.active) else {
            return Ok(None);
        };
        let secret = self.cipher.decrypt(&record.encrypted_secret)?;
        Ok(Some(ResolvedConfig { record, secret }))
    }

    /// Returns every active record of `kind`, decrypted, ordered by name.
    ///
    /// Records whose token is corrupted are skipped with a warning.
    pub async fn list_active(&self, kind: ConfigKind) -> Result<Vec<ResolvedConfig>> {
        let records = self.load_active().await;

        Ok(records
            .into_iter()
            .filter(|r| r.kind == kind)
            .filter_map(|record| match self.cipher.decrypt(&record.encrypted_secret) {
                Ok(secret) => Some(ResolvedConfig { record, secret }),
                Err(e) => {
                    warn!("Skipping configuration '{}': {}", record.name, e);
                    None
                }
            })
            .collect())
    }

    /// Returns every stored record, inactive ones included, without
    /// decrypting secrets.
    pub async fn list_all(&self) -> Result<Vec<ConfigRecord>> {
        let records = self.store.list_all().await?;
        let mut state = self.lock();
        state.cache = records
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();
        Ok(records)
    }

    /// Soft-deletes a record. Returns false when it does not exist.
    pub async fn deactivate(&self, name: &str) -> Result<bool> {
        let Some(mut record) = self.store.get(name).await? else {
            return Ok(false);
        };
        if !record.active {
            return Ok(true);
        }

        record.active = false;
        record.updated_at = next_timestamp(Some(record.updated_at));
        self.store.upsert(&record).await?;
        self.lock().cache.insert(record.name.clone(), record);

        info!("Deactivated configuration '{}'", name);
        Ok(true)
    }

    /// Physically removes a record (administrative purge).
    pub async fn hard_delete(&self, name: &str) -> Result<bool> {
        let removed = self.store.delete(name).await?;
        self.lock().cache.remove(name);
        if removed {
            warn!("Permanently deleted configuration '{}'", name);
        }
        Ok(removed)
    }

    /// Re-encrypts secrets that were stored as legacy plaintext.
    ///
    /// Returns the number of records rewritten.
    pub async fn reencrypt_legacy(&self) -> Result<usize> {
        let mut rewritten = 0usize;
        for mut record in self.store.list_all().await? {
            if !SecretCipher::needs_reencryption(&record.encrypted_secret) {
                continue;
            }
            let plaintext = Zeroizing::new(std::mem::take(&mut record.encrypted_secret));
            record.encrypted_secret = self.cipher.encrypt(&plaintext)?;
            record.updated_at = next_timestamp(Some(record.updated_at));
            self.store.upsert(&record).await?;
            self.lock().cache.insert(record.name.clone(), record);
            rewritten = rewritten.saturating_add(1);
        }

        if rewritten > 0 {
            info!("Re-encrypted {} legacy secrets", rewritten);
        }
        Ok(rewritten)
    }

    /// Takes the active descriptor from the environment.
    ///
    /// Only moves `Uninitialized` to `Bootstrapped`; later calls are no-ops.
    /// Without a bootstrap connection in the environment the state stays
    /// `Uninitialized`.
    ///
    /// # Errors
    /// Returns `Validation` when the environment describes a connection the
    /// validator rejects.
    pub fn bootstrap(&self, environment: &EnvironmentInputs) -> Result<ConnectionState> {
        let current = self.connection_state();
        if current != ConnectionState::Uninitialized {
            return Ok(current);
        }

        let Some(descriptor) = environment.bootstrap_descriptor()? else {
            info!("No bootstrap connection in the environment");
            return Ok(ConnectionState::Uninitialized);
        };
        self.check_descriptor(&descriptor)?;

        let mut state = self.lock();
        if matches!(state.active, ActivePointer::Uninitialized) {
            info!("Bootstrapped active connection {}", descriptor.to_safe_string());
            state.active = ActivePointer::Bootstrapped(Arc::new(descriptor));
        }
        Ok(state.active.state())
    }

    /// Snapshot of the active descriptor.
    pub fn active_connection(&self) -> Option<Arc<ConnectionDescriptor>> {
        self.lock().active.descriptor().cloned()
    }

    /// Name of the record the active descriptor was loaded from.
    pub fn active_record_name(&self) -> Option<String> {
        match &self.lock().active {
            ActivePointer::Reloaded { record, .. } => Some(record.clone()),
            _ => None,
        }
    }

    /// Current state of the active-connection pointer.
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().active.state()
    }

    /// Re-reads the store and swaps in the default connection if it changed.
    ///
    /// The default is the active database connection named
    /// `VaultConfig::default_record_name`, else the most recently updated
    /// active database connection. Failures are logged and reported in the
    /// outcome; the previous descriptor stays active.
    pub async fn reload_from_backing_store(&self) -> ReloadOutcome {
        let records = match self.store.list_active().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Reload failed, keeping last known configuration: {}", e);
                return ReloadOutcome::Failed(e.to_string());
            }
        };
        self.refresh_active_cache(&records);

        let Some(record) = self.resolve_default(records) else {
            debug!("No active database connection to reload");
            return ReloadOutcome::NoDefault;
        };

        let descriptor = match self.descriptor_for(&record) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Reload of '{}' rejected, keeping last known configuration: {}", record.name, e);
                return ReloadOutcome::Failed(e.to_string());
            }
        };

        let mut state = self.lock();
        let unchanged = match &state.active {
            ActivePointer::Reloaded {
                record: current,
                descriptor: active,
            } => *current == record.name && **active == descriptor,
            ActivePointer::Bootstrapped(active) => **active == descriptor,
            ActivePointer::Uninitialized => false,
        };
        if unchanged {
            return ReloadOutcome::Unchanged;
        }

        info!(
            "Active connection swapped to '{}' ({})",
            record.name,
            descriptor.to_safe_string()
        );
        state.active = ActivePointer::Reloaded {
            record: record.name.clone(),
            descriptor: Arc::new(descriptor),
        };
        ReloadOutcome::Swapped {
            record: record.name,
        }
    }

    fn resolve_default(&self, records: Vec<ConfigRecord>) -> Option<ConfigRecord> {
        let mut candidates: Vec<ConfigRecord> = records
            .into_iter()
            .filter(|r| r.active && r.kind == ConfigKind::DatabaseConnection)
            .collect();

        if let Some(index) = candidates
            .iter()
            .position(|r| r.name == self.config.default_record_name)
        {
            return Some(candidates.swap_remove(index));
        }

        candidates
            .into_iter()
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| b.name.cmp(&a.name)))
    }

    fn descriptor_for(&self, record: &ConfigRecord) -> Result<ConnectionDescriptor> {
        let secret = self.cipher.decrypt(&record.encrypted_secret)?;
        let descriptor = ConnectionDescriptor::from_fields(&record.fields, Some(secret.expose()))?;
        self.check_descriptor(&descriptor)?;
        Ok(descriptor)
    }

    fn check_descriptor(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        let connection_string = descriptor.to_connection_url()?;
        self.validator
            .validate_connection_string(&connection_string)
            .result
            .into_result()
            .map(|_| ())
    }

    async fn load_active(&self) -> Vec<ConfigRecord> {
        match self.store.list_active().await {
            Ok(records) => {
                self.refresh_active_cache(&records);
                records
            }
            Err(e) => {
                warn!("Backing store unreachable ({}); serving cached records", e);
                self.lock()
                    .cache
                    .values()
                    .filter(|r| r.active)
                    .cloned()
                    .collect()
            }
        }
    }

    /// Replaces cached active records with a fresh active listing.
    fn refresh_active_cache(&self, records: &[ConfigRecord]) {
        let mut state = self.lock();
        state.cache.retain(|_, r| !r.active);
        for record in records {
            state.cache.insert(record.name.clone(), record.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, VaultState> {
        // State updates are single assignments; a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current time at microsecond precision, strictly after `previous`.
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match previous {
        Some(previous) if now <= previous => previous
            .checked_add_signed(TimeDelta::microseconds(1))
            .unwrap_or(now),
        _ => now,
    }
}
