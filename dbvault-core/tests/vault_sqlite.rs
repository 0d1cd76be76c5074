//! Configuration vault integration tests over the SQLite backing store.
//!
//! This test suite covers:
//! - Save, read, list and delete through a file-backed store
//! - Persistence across reopening the store with the same key
//! - Secrets never written to disk in plaintext
//! - Decryption failure under a different key
//! - Legacy plaintext secrets re-encrypted in place
//! - Bootstrap and reload against the persisted default record

#![cfg(feature = "sqlite")]

use chrono::Utc;
use dbvault_core::{
    ConfigDraft, ConfigKind, ConfigRecord, ConfigStore, ConfigVault, ConnectionState,
    ConnectionValidator, DbVaultError, EnvironmentInputs, ReloadOutcome, Result, SecretCipher,
    VaultConfig,
    security::DerivedKey,
    vault::{SaveOutcome, SqliteConfigStore},
};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Helper function to open a file-backed store inside `dir`
async fn open_store(dir: &TempDir) -> Result<Arc<SqliteConfigStore>> {
    Ok(Arc::new(
        SqliteConfigStore::open(&dir.path().join("vault.db")).await?,
    ))
}

/// Helper function to build a vault with a fixed key
fn vault_with_key(store: Arc<SqliteConfigStore>, key_byte: u8) -> Result<ConfigVault> {
    ConfigVault::new(
        store,
        SecretCipher::new(&DerivedKey::from_bytes([key_byte; 32])),
        ConnectionValidator::default(),
        VaultConfig::default(),
    )
}

/// Helper function to build a PostgreSQL connection draft
fn postgres_draft(name: &str, host: &str, secret: &str) -> ConfigDraft {
    ConfigDraft::new(name, ConfigKind::DatabaseConnection)
        .with_field("db_type", "postgresql")
        .with_field("host", host)
        .with_field("port", "5432")
        .with_field("database", "erp")
        .with_field("username", "odoo_ro")
        .with_field("param.sslmode", "require")
        .with_secret(secret)
}

/// Reads every stored secret column directly from the store file
async fn raw_secrets(path: &Path) -> std::result::Result<Vec<String>, sqlx::Error> {
    let pool = SqlitePool::connect(&format!("sqlite://{}", path.display())).await?;
    let secrets: Vec<(String,)> = sqlx::query_as("SELECT encrypted_secret FROM config_records")
        .fetch_all(&pool)
        .await?;
    pool.close().await;
    Ok(secrets.into_iter().map(|(secret,)| secret).collect())
}

// =============================================================================
// Record Lifecycle Tests
// =============================================================================

/// Test the full lifecycle of a record through the SQLite store
#[tokio::test]
async fn test_sqlite_vault_lifecycle() -> Result<()> {
    let dir = TempDir::new().map_err(|e| DbVaultError::io("tempdir", e))?;
    let vault = vault_with_key(open_store(&dir).await?, 7)?;

    assert_eq!(
        vault.save(postgres_draft("prod", "db1.internal", "p@ss")).await?,
        SaveOutcome::Inserted
    );
    assert_eq!(
        vault.save(postgres_draft("prod", "db2.internal", "p@ss2")).await?,
        SaveOutcome::Updated
    );

    let resolved = vault.get("prod").await?.expect("record should exist");
    assert_eq!(resolved.record.field("host"), Some("db2.internal"));
    assert_eq!(resolved.secret.expose(), "p@ss2");
    assert!(resolved.record.updated_at > resolved.record.created_at);

    let descriptor = resolved.descriptor()?;
    assert_eq!(descriptor.host, "db2.internal");
    assert_eq!(descriptor.param("sslmode"), Some("require"));

    assert!(vault.deactivate("prod").await?);
    assert!(vault.list_active(ConfigKind::DatabaseConnection).await?.is_empty());
    assert_eq!(vault.list_all().await?.len(), 1);

    assert!(vault.hard_delete("prod").await?);
    assert!(vault.get("prod").await?.is_none());
    assert!(!vault.hard_delete("prod").await?);
    Ok(())
}

/// Test that secrets on disk are cipher tokens, never the plaintext
#[tokio::test]
async fn test_sqlite_secret_not_stored_in_plaintext() -> Result<()> {
    let dir = TempDir::new().map_err(|e| DbVaultError::io("tempdir", e))?;
    let store = open_store(&dir).await?;
    let vault = vault_with_key(store.clone(), 7)?;
    vault.save(postgres_draft("prod", "db1.internal", "hunter2-secret")).await?;
    store.close().await;

    let secrets = raw_secrets(&dir.path().join("vault.db"))
        .await
        .expect("store file should be readable");
    assert_eq!(secrets.len(), 1);
    assert!(!secrets[0].contains("hunter2-secret"));
    assert!(SecretCipher::is_token(&secrets[0]));
    Ok(())
}

/// Test records survive reopening the store and a different key cannot read them
#[tokio::test]
async fn test_sqlite_persistence_across_reopen() -> Result<()> {
    let dir = TempDir::new().map_err(|e| DbVaultError::io("tempdir", e))?;
    {
        let store = open_store(&dir).await?;
        let vault = vault_with_key(store.clone(), 7)?;
        vault.save(postgres_draft("prod", "db1.internal", "p@ss")).await?;
        store.close().await;
    }

    let store = open_store(&dir).await?;
    let vault = vault_with_key(store.clone(), 7)?;
    let resolved = vault.get("prod").await?.expect("record should persist");
    assert_eq!(resolved.secret.expose(), "p@ss");

    let other = vault_with_key(store, 9)?;
    assert!(matches!(
        other.get("prod").await,
        Err(DbVaultError::Encryption { .. })
    ));
    Ok(())
}

/// Test that a legacy plaintext secret is re-encrypted in place
#[tokio::test]
async fn test_sqlite_reencrypt_legacy_secret() -> Result<()> {
    let dir = TempDir::new().map_err(|e| DbVaultError::io("tempdir", e))?;
    let store = open_store(&dir).await?;
    let now = Utc::now();
    store
        .upsert(&ConfigRecord {
            name: "legacy".to_string(),
            kind: ConfigKind::DatabaseConnection,
            fields: BTreeMap::from([
                ("db_type".to_string(), "sqlite".to_string()),
                ("database".to_string(), "/var/lib/erp.db".to_string()),
            ]),
            encrypted_secret: "plain-legacy".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let vault = vault_with_key(store.clone(), 7)?;
    let before = vault.get("legacy").await?.expect("legacy record");
    assert_eq!(before.secret.expose(), "plain-legacy");
    assert!(!before.secret.was_encrypted());

    assert_eq!(vault.reencrypt_legacy().await?, 1);
    assert_eq!(vault.reencrypt_legacy().await?, 0);

    let stored = store.get("legacy").await?.expect("legacy record");
    assert!(SecretCipher::is_token(&stored.encrypted_secret));
    let after = vault.get("legacy").await?.expect("legacy record");
    assert_eq!(after.secret.expose(), "plain-legacy");
    assert!(after.secret.was_encrypted());
    Ok(())
}

// =============================================================================
// Active Connection Tests
// =============================================================================

/// Test bootstrap from the environment followed by a reload from the store
#[tokio::test]
async fn test_sqlite_bootstrap_then_reload() -> Result<()> {
    let dir = TempDir::new().map_err(|e| DbVaultError::io("tempdir", e))?;
    let vault = vault_with_key(open_store(&dir).await?, 7)?;

    let vars = BTreeMap::from([
        ("DBVAULT_DB_TYPE", "postgresql"),
        ("DBVAULT_DB_HOST", "bootstrap.internal"),
        ("DBVAULT_DB_NAME", "erp"),
        ("DBVAULT_DB_USER", "odoo_ro"),
        ("DBVAULT_DB_PASSWORD", "boot-pass"),
    ]);
    let environment = EnvironmentInputs::from_lookup(|key| vars.get(key).map(ToString::to_string));

    assert_eq!(vault.bootstrap(&environment)?, ConnectionState::Bootstrapped);
    let active = vault.active_connection().expect("bootstrap descriptor");
    assert_eq!(active.host, "bootstrap.internal");

    assert!(matches!(
        vault.reload_from_backing_store().await,
        ReloadOutcome::NoDefault
    ));
    assert_eq!(vault.connection_state(), ConnectionState::Bootstrapped);

    vault.save(postgres_draft("default", "db1.internal", "p@ss")).await?;
    assert!(matches!(
        vault.reload_from_backing_store().await,
        ReloadOutcome::Swapped { .. }
    ));
    assert_eq!(vault.connection_state(), ConnectionState::Reloaded);
    assert_eq!(vault.active_record_name().as_deref(), Some("default"));
    let active = vault.active_connection().expect("reloaded descriptor");
    assert_eq!(active.host, "db1.internal");
    assert_eq!(active.credentials.password(), Some("p@ss"));
    Ok(())
}
