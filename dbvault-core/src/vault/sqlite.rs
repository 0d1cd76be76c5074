//! SQLite backing store.
//!
//! Records live in a single `config_records` table keyed by name. `fields`
//! is JSON text, `encrypted_secret` is stored as the opaque cipher token and
//! timestamps are RFC 3339 strings with microsecond precision.

use super::store::ConfigStore;
use crate::Result;
use crate::error::DbVaultError;
use crate::models::{ConfigKind, ConfigRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS config_records (
    name TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    fields TEXT NOT NULL,
    encrypted_secret TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const UPSERT: &str = "INSERT INTO config_records
    (name, kind, fields, encrypted_secret, active, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(name) DO UPDATE SET
        kind = excluded.kind,
        fields = excluded.fields,
        encrypted_secret = excluded.encrypted_secret,
        active = excluded.active,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at";

const SELECT_COLUMNS: &str =
    "SELECT name, kind, fields, encrypted_secret, active, created_at, updated_at FROM config_records";

/// SQLite-backed [`ConfigStore`].
#[derive(Debug, Clone)]
pub struct SqliteConfigStore {
    pool: SqlitePool,
    location: Option<PathBuf>,
}

impl SqliteConfigStore {
    /// Opens (creating if missing) the store file at `path`.
    ///
    /// # Errors
    /// Returns a store error when the file cannot be opened or the table
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                DbVaultError::store_failed(
                    format!("Failed to open configuration store {}", path.display()),
                    e,
                )
            })?;

        Self::initialize(pool, Some(path.to_path_buf())).await
    }

    /// Opens a private in-memory store.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection: every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DbVaultError::store_failed("Failed to open in-memory store", e))?;

        Self::initialize(pool, None).await
    }

    async fn initialize(pool: SqlitePool, location: Option<PathBuf>) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| DbVaultError::store_failed("Failed to create config_records table", e))?;
        debug!(
            "Configuration store ready at {}",
            location
                .as_deref()
                .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string())
        );
        Ok(Self { pool, location })
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn select(&self, filter: &str) -> Result<Vec<ConfigRecord>> {
        let sql = format!("{} {} ORDER BY name", SELECT_COLUMNS, filter);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DbVaultError::store_failed("Failed to list configuration records", e))?;
        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl ConfigStore for SqliteConfigStore {
    async fn upsert(&self, record: &ConfigRecord) -> Result<()> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| DbVaultError::serialization("Failed to encode record fields", e))?;

        sqlx::query(UPSERT)
            .bind(&record.name)
            .bind(record.kind.as_str())
            .bind(fields)
            .bind(&record.encrypted_secret)
            .bind(record.active)
            .bind(format_timestamp(&record.created_at))
            .bind(format_timestamp(&record.updated_at))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DbVaultError::store_failed(format!("Failed to save record '{}'", record.name), e)
            })?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ConfigRecord>> {
        let sql = format!("{} WHERE name = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                DbVaultError::store_failed(format!("Failed to read record '{}'", name), e)
            })?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<ConfigRecord>> {
        self.select("WHERE active = 1").await
    }

    async fn list_all(&self) -> Result<Vec<ConfigRecord>> {
        self.select("").await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM config_records WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DbVaultError::store_failed(format!("Failed to delete record '{}'", name), e)
            })?;
        Ok(result.rows_affected() > 0)
    }

    fn describe(&self) -> String {
        match &self.location {
            Some(path) => format!("SQLite store at {}", path.display()),
            None => "in-memory SQLite store".to_string(),
        }
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbVaultError::store_failed(format!("Invalid {} timestamp", column), e))
}

fn record_from_row(row: &SqliteRow) -> Result<ConfigRecord> {
    let column = |name: &str| -> Result<String> {
        row.try_get::<String, _>(name).map_err(|e| {
            DbVaultError::store_failed(format!("Failed to decode column {}", name), e)
        })
    };

    let kind: ConfigKind = column("kind")?.parse()?;
    let fields: BTreeMap<String, String> = serde_json::from_str(&column("fields")?)
        .map_err(|e| DbVaultError::serialization("Invalid record fields", e))?;
    let active: bool = row
        .try_get("active")
        .map_err(|e| DbVaultError::store_failed("Failed to decode column active", e))?;

    Ok(ConfigRecord {
        name: column("name")?,
        kind,
        fields,
        encrypted_secret: column("encrypted_secret")?,
        active,
        created_at: parse_timestamp("created_at", &column("created_at")?)?,
        updated_at: parse_timestamp("updated_at", &column("updated_at")?)?,
    })
}
