//! Direct-introspection channel over the read-only SQL pools.

use crate::Result;
use crate::models::{EntityType, InventoryItem, SourceKind};
use crate::security::BackendFamily;
use crate::validation::ReadOnlyQuery;
use std::collections::BTreeMap;

#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
pub use sql::SqlIntrospectionChannel;

/// Column every introspection query must return as the entity name.
const NAME_COLUMN: &str = "name";

const ODOO_MODULES: &str = "SELECT name, state, latest_version \
     FROM ir_module_module WHERE state = 'installed' ORDER BY name";
// res_groups.name is varchar on older releases and translated jsonb on newer ones.
const ODOO_ROLES: &str = "SELECT COALESCE(to_jsonb(name) ->> 'en_US', name::text) AS name \
     FROM res_groups ORDER BY 1";
const ODOO_TABLES: &str = "SELECT table_name AS name FROM information_schema.tables \
     WHERE table_schema = 'public' AND table_type = 'BASE TABLE' ORDER BY table_name";
const ODOO_PROPERTIES: &str = "SELECT key AS name FROM ir_config_parameter ORDER BY key";
const ODOO_SCHEDULED_JOBS: &str = "SELECT COALESCE(to_jsonb(cron_name) ->> 'en_US', cron_name::text) AS name, \
     active, interval_number, interval_type FROM ir_cron ORDER BY 1";

const MYSQL_TABLES: &str = "SELECT table_name AS name FROM information_schema.tables \
     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name";

const SQLITE_TABLES: &str = "SELECT name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

/// One validated read-only query per entity type.
///
/// Entity types without a query are not collected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntrospectionCatalog {
    queries: BTreeMap<EntityType, ReadOnlyQuery>,
}

impl IntrospectionCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the query for an entity type.
    ///
    /// # Errors
    /// Returns `DbVaultError::Validation` when `sql` is not a read-only
    /// query.
    pub fn with_query(mut self, entity_type: EntityType, sql: &str) -> Result<Self> {
        self.queries.insert(entity_type, ReadOnlyQuery::new(sql)?);
        Ok(self)
    }

    /// Queries for an Odoo database hosted on PostgreSQL.
    pub fn odoo_postgres() -> Result<Self> {
        Self::new()
            .with_query(EntityType::Module, ODOO_MODULES)?
            .with_query(EntityType::Role, ODOO_ROLES)?
            .with_query(EntityType::Table, ODOO_TABLES)?
            .with_query(EntityType::Property, ODOO_PROPERTIES)?
            .with_query(EntityType::ScheduledJob, ODOO_SCHEDULED_JOBS)
    }

    /// Default catalog for a backend family.
    ///
    /// PostgreSQL gets the full Odoo catalog; MySQL and SQLite only list
    /// tables. Other families have no default.
    pub fn for_backend(backend: BackendFamily) -> Result<Self> {
        match backend {
            BackendFamily::PostgreSQL => Self::odoo_postgres(),
            BackendFamily::MySQL => Self::new().with_query(EntityType::Table, MYSQL_TABLES),
            BackendFamily::SQLite => Self::new().with_query(EntityType::Table, SQLITE_TABLES),
            BackendFamily::SqlServer | BackendFamily::Oracle => Ok(Self::new()),
        }
    }

    /// Query for one entity type.
    pub fn query(&self, entity_type: EntityType) -> Option<&ReadOnlyQuery> {
        self.queries.get(&entity_type)
    }

    /// Every configured query, in entity-type order.
    pub fn queries(&self) -> impl Iterator<Item = (EntityType, &ReadOnlyQuery)> {
        self.queries.iter().map(|(entity_type, query)| (*entity_type, query))
    }

    /// True when no entity type is configured.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Turns result rows into inventory items.
///
/// The `name` column becomes the item name and every other column an
/// attribute. Returns the items and the number of rows without a name.
pub(crate) fn items_from_rows(
    entity_type: EntityType,
    rows: Vec<BTreeMap<String, String>>,
) -> (Vec<InventoryItem>, usize) {
    let mut unnamed = 0usize;
    let mut items = Vec::with_capacity(rows.len());

    for mut row in rows {
        let Some(name) = row.remove(NAME_COLUMN).filter(|n| !n.trim().is_empty()) else {
            unnamed = unnamed.saturating_add(1);
            continue;
        };
        let mut item = InventoryItem::new(SourceKind::Introspection, entity_type, name);
        item.attributes = row;
        items.push(item);
    }
    (items, unnamed)
}

#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
mod sql {
    use crate::connector::IntrospectionChannel;
    use crate::Result;
    use crate::driver::DatabasePool;
    use crate::error::DbVaultError;
    use crate::security::ConnectionDescriptor;
    use crate::validation::{ConnectionValidator, ReadOnlyQuery};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tracing::{debug, warn};

    /// Introspection channel backed by a read-only sqlx pool.
    #[derive(Debug)]
    pub struct SqlIntrospectionChannel {
        descriptor: ConnectionDescriptor,
        pool: Option<DatabasePool>,
    }

    impl SqlIntrospectionChannel {
        /// Creates a channel for a descriptor the validator accepts.
        ///
        /// No connection is opened until [`IntrospectionChannel::connect`].
        ///
        /// # Errors
        /// - `Validation` when the validator rejects the descriptor
        /// - `Configuration` when no driver for its backend is compiled in
        pub fn new(descriptor: ConnectionDescriptor, validator: &ConnectionValidator) -> Result<Self> {
            let connection_string = descriptor.to_connection_url()?;
            let validation = validator.validate_connection_string(&connection_string).result;
            for warning in &validation.warnings {
                warn!("Introspection target {}: {}", descriptor.to_safe_string(), warning);
            }
            validation.into_result()?;

            if !DatabasePool::supports(descriptor.backend) {
                return Err(DbVaultError::configuration(format!(
                    "No {} driver available for introspection",
                    descriptor.backend
                )));
            }

            Ok(Self {
                descriptor,
                pool: None,
            })
        }

        fn pool(&self) -> Result<&DatabasePool> {
            self.pool.as_ref().ok_or_else(|| {
                DbVaultError::channel("introspection", "Channel is not connected")
            })
        }
    }

    #[async_trait]
    impl IntrospectionChannel for SqlIntrospectionChannel {
        async fn connect(&mut self, timeout: Duration) -> Result<()> {
            if self.pool.is_some() {
                return Ok(());
            }
            let pool =
                DatabasePool::connect(&self.descriptor, self.descriptor.pool_size, timeout).await?;
            self.pool = Some(pool);
            debug!("Introspection pool open for {}", self.descriptor.to_safe_string());
            Ok(())
        }

        async fn test_connection(&self, timeout: Duration) -> bool {
            match &self.pool {
                Some(pool) => pool.ping(timeout).await.is_ok(),
                None => false,
            }
        }

        async fn query(
            &self,
            query: &ReadOnlyQuery,
            timeout: Duration,
        ) -> Result<Vec<BTreeMap<String, String>>> {
            self.pool()?.fetch_rows(query, timeout).await
        }

        async fn close(&mut self) {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }
        }

        fn describe(&self) -> String {
            self.descriptor.to_safe_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalogs_are_read_only() {
        let catalog = IntrospectionCatalog::odoo_postgres().unwrap();
        let entities: Vec<EntityType> = catalog.queries().map(|(e, _)| e).collect();
        assert_eq!(entities, EntityType::ALL.to_vec());

        for backend in [BackendFamily::MySQL, BackendFamily::SQLite] {
            let catalog = IntrospectionCatalog::for_backend(backend).unwrap();
            assert!(catalog.query(EntityType::Table).is_some());
            assert!(catalog.query(EntityType::Module).is_none());
        }
        assert!(IntrospectionCatalog::for_backend(BackendFamily::Oracle)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_catalog_rejects_mutating_query() {
        let result = IntrospectionCatalog::new()
            .with_query(EntityType::Table, "DELETE FROM res_users");
        assert!(result.is_err());
    }

    #[test]
    fn test_items_from_rows() {
        let rows = vec![
            BTreeMap::from([
                ("name".to_string(), "sale".to_string()),
                ("state".to_string(), "installed".to_string()),
            ]),
            BTreeMap::from([("state".to_string(), "installed".to_string())]),
            BTreeMap::from([("name".to_string(), "  ".to_string())]),
        ];
        let (items, unnamed) = items_from_rows(EntityType::Module, rows);
        assert_eq!(unnamed, 2);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, SourceKind::Introspection);
        assert_eq!(items[0].name, "sale");
        assert_eq!(items[0].attributes.get("state").map(String::as_str), Some("installed"));
        assert!(!items[0].attributes.contains_key("name"));
    }
}
