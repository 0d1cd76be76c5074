//! Read-only database pools shared by the reachability probe and the
//! introspection channel.
//!
//! # Security Features
//! - SQLite databases are opened read-only
//! - PostgreSQL sessions default to read-only transactions with a statement timeout
//! - Only [`ReadOnlyQuery`] values can be executed
//! - Every network operation is bounded by an explicit timeout

use crate::error::{DbVaultError, with_timeout};
use crate::security::{BackendFamily, ConnectionDescriptor};
use crate::validation::ReadOnlyQuery;
use crate::Result;
use sqlx::{Column, ColumnIndex, Decode, Row, Type};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// A pool for one of the compiled-in backends.
#[derive(Debug, Clone)]
pub(crate) enum DatabasePool {
    #[cfg(feature = "postgresql")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "mysql")]
    MySql(sqlx::MySqlPool),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// True when a driver for `backend` is compiled in.
    pub(crate) fn supports(backend: BackendFamily) -> bool {
        match backend {
            BackendFamily::PostgreSQL => cfg!(feature = "postgresql"),
            BackendFamily::MySQL => cfg!(feature = "mysql"),
            BackendFamily::SQLite => cfg!(feature = "sqlite"),
            BackendFamily::SqlServer | BackendFamily::Oracle => false,
        }
    }

    /// Opens a pool and verifies that one connection can be established.
    ///
    /// # Errors
    /// Returns a timeout error when the connection is not ready within
    /// `timeout`, and a sanitized connection error on driver failures.
    pub(crate) async fn connect(
        descriptor: &ConnectionDescriptor,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let max_connections = max_connections.clamp(1, 100);
        debug!(
            "Opening {} pool to {}",
            descriptor.backend,
            descriptor.to_safe_string()
        );

        match descriptor.backend {
            #[cfg(feature = "postgresql")]
            BackendFamily::PostgreSQL => {
                Self::connect_postgres(descriptor, max_connections, timeout).await
            }
            #[cfg(feature = "mysql")]
            BackendFamily::MySQL => Self::connect_mysql(descriptor, max_connections, timeout).await,
            #[cfg(feature = "sqlite")]
            BackendFamily::SQLite => Self::connect_sqlite(descriptor, timeout).await,
            other => Err(DbVaultError::configuration(format!(
                "No driver available for {} connections",
                other
            ))),
        }
    }

    #[cfg(feature = "postgresql")]
    async fn connect_postgres(
        descriptor: &ConnectionDescriptor,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self> {
        use sqlx::Executor;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use std::str::FromStr;

        let url = descriptor.to_connection_url()?;
        let options = PgConnectOptions::from_str(&url).map_err(|e| {
            DbVaultError::configuration(format!("Invalid PostgreSQL connection options: {}", e))
        })?;
        let statement_timeout_ms = timeout.as_millis();

        let pool = with_timeout("PostgreSQL connect", timeout, async move {
            PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(timeout)
                .after_connect(move |conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET default_transaction_read_only = on").await?;
                        conn.execute(
                            format!("SET statement_timeout = {}", statement_timeout_ms).as_str(),
                        )
                        .await?;
                        conn.execute("SET application_name = 'dbvault'").await?;
                        Ok(())
                    })
                })
                .connect_with(options)
                .await
                .map_err(DbVaultError::connection_failed)
        })
        .await?;

        Ok(Self::Postgres(pool))
    }

    #[cfg(feature = "mysql")]
    async fn connect_mysql(
        descriptor: &ConnectionDescriptor,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self> {
        use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
        use std::str::FromStr;

        let url = descriptor.to_connection_url()?;
        let options = MySqlConnectOptions::from_str(&url).map_err(|e| {
            DbVaultError::configuration(format!("Invalid MySQL connection options: {}", e))
        })?;

        let pool = with_timeout("MySQL connect", timeout, async move {
            MySqlPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(timeout)
                .connect_with(options)
                .await
                .map_err(DbVaultError::connection_failed)
        })
        .await?;

        Ok(Self::MySql(pool))
    }

    #[cfg(feature = "sqlite")]
    async fn connect_sqlite(descriptor: &ConnectionDescriptor, timeout: Duration) -> Result<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        let url = descriptor.to_connection_url()?;
        let mut options = SqliteConnectOptions::from_str(&url).map_err(|e| {
            DbVaultError::configuration(format!("Invalid SQLite connection options: {}", e))
        })?;
        if !descriptor.is_in_memory() {
            options = options.read_only(true);
        }

        // A single connection keeps in-memory databases coherent.
        let pool = with_timeout("SQLite open", timeout, async move {
            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(timeout)
                .connect_with(options)
                .await
                .map_err(DbVaultError::connection_failed)
        })
        .await?;

        Ok(Self::Sqlite(pool))
    }

    /// Runs `SELECT 1` to check the connection is usable.
    pub(crate) async fn ping(&self, timeout: Duration) -> Result<()> {
        let probe = "SELECT 1";
        with_timeout("connection probe", timeout, async {
            let result = match self {
                #[cfg(feature = "postgresql")]
                Self::Postgres(pool) => sqlx::query(probe).execute(pool).await.map(|_| ()),
                #[cfg(feature = "mysql")]
                Self::MySql(pool) => sqlx::query(probe).execute(pool).await.map(|_| ()),
                #[cfg(feature = "sqlite")]
                Self::Sqlite(pool) => sqlx::query(probe).execute(pool).await.map(|_| ()),
            };
            result.map_err(DbVaultError::connection_failed)
        })
        .await
    }

    /// Executes a validated read-only query and flattens every row.
    ///
    /// NULL columns are omitted from the row map; other values are rendered
    /// as text.
    pub(crate) async fn fetch_rows(
        &self,
        query: &ReadOnlyQuery,
        timeout: Duration,
    ) -> Result<Vec<BTreeMap<String, String>>> {
        let sql = query.as_str();
        with_timeout("introspection query", timeout, async {
            let rows: std::result::Result<Vec<BTreeMap<String, String>>, sqlx::Error> = match self {
                #[cfg(feature = "postgresql")]
                Self::Postgres(pool) => sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map(|rows| rows.iter().map(|row| row_to_map(row)).collect()),
                #[cfg(feature = "mysql")]
                Self::MySql(pool) => sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map(|rows| rows.iter().map(|row| row_to_map(row)).collect()),
                #[cfg(feature = "sqlite")]
                Self::Sqlite(pool) => sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map(|rows| rows.iter().map(|row| row_to_map(row)).collect()),
            };
            rows.map_err(|e| DbVaultError::query_failed(e.to_string()))
        })
        .await
    }

    /// Closes the pool gracefully.
    pub(crate) async fn close(&self) {
        match self {
            #[cfg(feature = "postgresql")]
            Self::Postgres(pool) => pool.close().await,
            #[cfg(feature = "mysql")]
            Self::MySql(pool) => pool.close().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Flattens a row into column name and text value pairs.
fn row_to_map<'r, R>(row: &'r R) -> BTreeMap<String, String>
where
    R: Row,
    usize: ColumnIndex<R>,
    Option<String>: Decode<'r, R::Database> + Type<R::Database>,
    Option<i64>: Decode<'r, R::Database> + Type<R::Database>,
    Option<i32>: Decode<'r, R::Database> + Type<R::Database>,
    Option<f64>: Decode<'r, R::Database> + Type<R::Database>,
    Option<bool>: Decode<'r, R::Database> + Type<R::Database>,
    Option<serde_json::Value>: Decode<'r, R::Database> + Type<R::Database>,
    Option<chrono::NaiveDateTime>: Decode<'r, R::Database> + Type<R::Database>,
{
    let mut map = BTreeMap::new();
    for (index, column) in row.columns().iter().enumerate() {
        if let Some(value) = extract_column_value(row, index) {
            map.insert(column.name().to_string(), value);
        }
    }
    map
}

/// Extracts a column value as text, trying types in order of likelihood.
fn extract_column_value<'r, R>(row: &'r R, index: usize) -> Option<String>
where
    R: Row,
    usize: ColumnIndex<R>,
    Option<String>: Decode<'r, R::Database> + Type<R::Database>,
    Option<i64>: Decode<'r, R::Database> + Type<R::Database>,
    Option<i32>: Decode<'r, R::Database> + Type<R::Database>,
    Option<f64>: Decode<'r, R::Database> + Type<R::Database>,
    Option<bool>: Decode<'r, R::Database> + Type<R::Database>,
    Option<serde_json::Value>: Decode<'r, R::Database> + Type<R::Database>,
    Option<chrono::NaiveDateTime>: Decode<'r, R::Database> + Type<R::Database>,
{
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(|b| b.to_string());
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(index) {
        return v.map(|json| match json {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return v.map(|ts| ts.to_string());
    }

    debug!("Skipping column {} with an unsupported type", index);
    None
}

#[cfg(all(test, feature = "sqlite"))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn seeded_memory_pool() -> DatabasePool {
        let descriptor = ConnectionDescriptor::parse("sqlite::memory:").unwrap();
        let pool = DatabasePool::connect(&descriptor, 1, Duration::from_secs(5))
            .await
            .unwrap();
        let DatabasePool::Sqlite(inner) = &pool else {
            panic!("expected a SQLite pool");
        };
        sqlx::query("CREATE TABLE modules (name TEXT, installed BOOLEAN, seq INTEGER, note TEXT)")
            .execute(inner)
            .await
            .unwrap();
        sqlx::query("INSERT INTO modules VALUES ('sale', 1, 3, NULL), ('crm', 0, 7, 'x')")
            .execute(inner)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sqlite_ping_and_fetch_rows() {
        let pool = seeded_memory_pool().await;
        pool.ping(Duration::from_secs(5)).await.unwrap();

        let query = ReadOnlyQuery::new("SELECT name, seq, note FROM modules ORDER BY name").unwrap();
        let rows = pool.fetch_rows(&query, Duration::from_secs(5)).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").map(String::as_str), Some("crm"));
        assert_eq!(rows[0].get("seq").map(String::as_str), Some("7"));
        assert_eq!(rows[1].get("name").map(String::as_str), Some("sale"));
        assert!(!rows[1].contains_key("note"));
        pool.close().await;
    }

    #[tokio::test]
    async fn test_query_error_is_reported() {
        let pool = seeded_memory_pool().await;
        let query = ReadOnlyQuery::new("SELECT name FROM missing_table").unwrap();
        let result = pool.fetch_rows(&query, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(DbVaultError::QueryExecution { .. })));
    }

    #[test]
    fn test_supports_reports_compiled_drivers() {
        assert!(DatabasePool::supports(BackendFamily::SQLite));
        assert!(!DatabasePool::supports(BackendFamily::Oracle));
    }
}
