//! Security and correctness properties exercised through the public API.
//!
//! This test suite covers:
//! - Injection rejection for queries, URLs and connection strings
//! - Allow-list acceptance and descriptor parsing
//! - Correlation score boundaries and symmetry
//! - Sliding-window rate limiting
//! - Environment-derived vault keys: same inputs read the same secrets,
//!   different inputs cannot

use dbvault_core::{
    ConfigDraft, ConfigKind, ConfigVault, ConnectionValidator, CorrelationEngine, DbVaultError,
    EntityType, EnvironmentInputs, InventoryItem, RateLimiter, Result, Settings, SourceKind,
    validation::ReadOnlyQuery,
    vault::MemoryConfigStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn api(name: &str) -> InventoryItem {
    InventoryItem::new(SourceKind::Api, EntityType::Module, name)
}

fn db(name: &str) -> InventoryItem {
    InventoryItem::new(SourceKind::Introspection, EntityType::Module, name)
}

fn names(entities: &[dbvault_core::EntityName]) -> Vec<&str> {
    entities.iter().map(|e| e.name.as_str()).collect()
}

// =============================================================================
// Injection Rejection
// =============================================================================

#[test]
fn test_security_query_injection_rejected() {
    let validator = ConnectionValidator::default();
    for query in [
        "DROP TABLE accounts;",
        "SELECT * FROM x; DELETE FROM y",
        "SELECT name FROM res_users -- bypass",
        "SELECT name FROM res_users /* hidden */",
        "SELECT name FROM res_users UNION SELECT password FROM res_users",
        "UPDATE res_users SET active = false",
        "WITH doomed AS (DELETE FROM t RETURNING *) SELECT * FROM doomed",
    ] {
        let result = validator.validate_query(query);
        assert!(!result.valid, "{} should be rejected", query);
        assert!(ReadOnlyQuery::new(query).is_err());
    }

    let result = validator.validate_query("SELECT name, state FROM ir_module_module ORDER BY name");
    assert!(result.valid, "{:?}", result.errors);
}

#[test]
fn test_security_url_injection_rejected() {
    let validator = ConnectionValidator::default();

    let result = validator.validate_url("https://host/<script>");
    assert!(!result.valid);
    let sanitized = result.sanitized.unwrap_or_default();
    assert!(!sanitized.contains('<'));

    for url in [
        "javascript:alert(1)",
        "https://host/?q=1 UNION SELECT password FROM users",
        "https://host/\u{7}bell",
        "ftp://files.example.com/dump",
    ] {
        assert!(!validator.validate_url(url).valid, "{} should be rejected", url);
    }
}

#[test]
fn test_security_connection_string_injection_rejected() {
    let validator = ConnectionValidator::default();
    for connection_string in [
        "postgresql://u:p@localhost/db;DROP TABLE users",
        "postgresql://u:p@localhost/db?options=%27%20OR%20%271%27%3D%271",
        "postgresql://u:p@localhost/db?application_name=<script>",
        "redis://u:p@localhost/0",
    ] {
        let outcome = validator.validate_connection_string(connection_string);
        assert!(!outcome.result.valid, "{} should be rejected", connection_string);
        assert!(outcome.into_descriptor().is_err());
    }
}

// =============================================================================
// Allow-list Acceptance
// =============================================================================

#[test]
fn test_connection_string_allow_list_acceptance() {
    let outcome = ConnectionValidator::default()
        .validate_connection_string("postgresql://user:pw@localhost:5432/db");
    assert!(outcome.result.valid, "{:?}", outcome.result.errors);
    assert_eq!(outcome.db_type(), Some("postgresql"));

    let sanitized = outcome.result.sanitized.clone().unwrap_or_default();
    assert!(!sanitized.contains(":pw@"));

    let descriptor = outcome.into_descriptor().expect("valid descriptor");
    assert_eq!(descriptor.host, "localhost");
    assert_eq!(descriptor.port, Some(5432));
    assert_eq!(descriptor.database, "db");
    assert_eq!(descriptor.credentials.password(), Some("pw"));
}

// =============================================================================
// Correlation Properties
// =============================================================================

#[test]
fn test_correlation_score_boundaries() {
    let engine = CorrelationEngine::new();

    let empty = engine.correlate(&[], &[]);
    assert!(empty.score.abs() < f64::EPSILON);
    assert!(empty.matched.is_empty());

    let same = engine.correlate(&[api("a")], &[db("a")]);
    assert!((same.score - 1.0).abs() < f64::EPSILON);
    assert_eq!(names(&same.matched), vec!["a"]);

    let disjoint = engine.correlate(&[api("a")], &[db("b")]);
    assert!(disjoint.score.abs() < f64::EPSILON);
    assert_eq!(names(&disjoint.api_only), vec!["a"]);
    assert_eq!(names(&disjoint.introspection_only), vec!["b"]);
}

#[test]
fn test_correlation_symmetry_and_determinism() {
    let engine = CorrelationEngine::new();
    let left = vec![api("sale"), api("stock"), api("crm")];
    let right = vec![db("stock"), db("mrp"), db("sale")];

    let forward = engine.correlate(&left, &right);
    let backward = engine.correlate(&right, &left);
    assert_eq!(backward, forward.swapped());
    assert_eq!(engine.correlate(&left, &right), forward);
    assert!((forward.score - 0.5).abs() < f64::EPSILON);
}

// =============================================================================
// Rate Limiter
// =============================================================================

#[test]
fn test_rate_limiter_sliding_window() {
    let limiter = RateLimiter::new(2, Duration::from_secs(60));
    let decisions: Vec<bool> = (0..3).map(|_| limiter.allow()).collect();
    assert_eq!(decisions, vec![true, true, false]);
    assert_eq!(limiter.remaining(), 0);
}

// =============================================================================
// Environment-derived Keys
// =============================================================================

fn environment(secret_key: &str) -> EnvironmentInputs {
    let vars = BTreeMap::from([
        ("DBVAULT_DB_HOST", "db1.internal".to_string()),
        ("DBVAULT_DB_NAME", "erp".to_string()),
        ("DBVAULT_DB_USER", "odoo_ro".to_string()),
        ("DBVAULT_SECRET_KEY", secret_key.to_string()),
    ]);
    EnvironmentInputs::from_lookup(|key| vars.get(key).cloned())
}

#[tokio::test]
async fn test_encryption_key_derived_from_environment() -> Result<()> {
    let store = Arc::new(MemoryConfigStore::new());
    let settings = Settings::default();

    let first = ConfigVault::from_environment(store.clone(), &environment("s3cret"), &settings)?;
    first
        .save(
            ConfigDraft::new("prod", ConfigKind::DatabaseConnection)
                .with_field("db_type", "postgresql")
                .with_field("host", "db1.internal")
                .with_field("database", "erp")
                .with_field("username", "odoo_ro")
                .with_field("param.sslmode", "require")
                .with_secret("p@ss"),
        )
        .await?;

    // Same inputs derive the same key.
    let second = ConfigVault::from_environment(store.clone(), &environment("s3cret"), &settings)?;
    let resolved = second.get("prod").await?.expect("record");
    assert_eq!(resolved.secret.expose(), "p@ss");

    let other = ConfigVault::from_environment(store, &environment("other"), &settings)?;
    assert!(matches!(
        other.get("prod").await,
        Err(DbVaultError::Encryption { .. })
    ));
    Ok(())
}
