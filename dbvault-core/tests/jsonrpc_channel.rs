//! JSON-RPC remote-API channel integration tests.
//!
//! This test suite covers:
//! - Connection test via `common.version` and `common.authenticate`
//! - Rejected logins and JSON-RPC error envelopes
//! - `search_read` extraction and table naming
//! - HTTP failures surfaced as channel errors
//! - Endpoints resolved from a vault record
//!
//! Note: the remote server is a wiremock instance, no network access needed.

#![cfg(feature = "remote-api")]

use dbvault_core::{
    ApiChannel, ConfigDraft, ConfigKind, ConfigVault, ConnectionValidator, DbVaultError,
    EntityType, Result, SecretCipher, SourceKind, VaultConfig,
    connector::{ApiCatalog, ApiModel, JsonRpcApiChannel, RemoteEndpoint},
    security::DerivedKey,
    vault::MemoryConfigStore,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps a result in a JSON-RPC response envelope
fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result,
    }))
}

/// Mounts a response for the call whose body contains `marker`
async fn mount_call(server: &MockServer, marker: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_string_contains(marker))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mounts a server version and a login result
async fn mount_login(server: &MockServer, uid: Value) {
    mount_call(
        server,
        "\"version\"",
        rpc_result(json!({"server_version": "17.0", "protocol_version": 1})),
    )
    .await;
    mount_call(server, "\"authenticate\"", rpc_result(uid)).await;
}

/// Helper function to create a channel for the mock server
fn channel_for(server: &MockServer, catalog: ApiCatalog) -> Result<JsonRpcApiChannel> {
    let endpoint = RemoteEndpoint::new(server.uri(), "erp", "inventory-bot", "api-key-123");
    Ok(JsonRpcApiChannel::new(endpoint, &ConnectionValidator::default())?.with_catalog(catalog))
}

fn table_catalog() -> ApiCatalog {
    ApiCatalog::empty().with_model(EntityType::Table, ApiModel::new("ir.model", &["model"]))
}

// =============================================================================
// Connection Test
// =============================================================================

/// Test a successful login reports the uid and server version
#[tokio::test]
async fn test_jsonrpc_authenticate_success() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, json!(2)).await;

    let mut channel = channel_for(&server, table_catalog())?;
    let probe = channel.test_connection(TIMEOUT).await;

    assert!(probe.success, "{}", probe.message);
    assert!(probe.message.contains("uid 2"));
    assert!(probe.message.contains("17.0"));
    Ok(())
}

/// Test a `false` uid is reported as a rejected login
#[tokio::test]
async fn test_jsonrpc_authenticate_rejected() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, json!(false)).await;

    let mut channel = channel_for(&server, table_catalog())?;
    let probe = channel.test_connection(TIMEOUT).await;

    assert!(!probe.success);
    assert!(probe.message.contains("Authentication rejected"));
    assert!(!probe.message.contains("api-key-123"));

    let result = channel.fetch_entities(EntityType::Table, TIMEOUT).await;
    assert!(matches!(result, Err(DbVaultError::Channel { .. })));
    Ok(())
}

/// Test a JSON-RPC error envelope is surfaced with its detail message
#[tokio::test]
async fn test_jsonrpc_error_envelope() -> Result<()> {
    let server = MockServer::start().await;
    mount_call(
        &server,
        "\"version\"",
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": 200,
                "message": "Odoo Server Error",
                "data": {"message": "Database erp does not exist"},
            },
        })),
    )
    .await;

    let mut channel = channel_for(&server, table_catalog())?;
    let probe = channel.test_connection(TIMEOUT).await;

    assert!(!probe.success);
    assert!(probe.message.contains("Database erp does not exist"));
    Ok(())
}

// =============================================================================
// Extraction Tests
// =============================================================================

/// Test `search_read` records become API items named after their tables
#[tokio::test]
async fn test_jsonrpc_fetch_tables() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, json!(2)).await;
    mount_call(
        &server,
        "\"ir.model\"",
        rpc_result(json!([
            {"id": 1, "model": "res.partner"},
            {"id": 2, "model": "sale.order"},
            {"id": 3},
        ])),
    )
    .await;

    let mut channel = channel_for(&server, table_catalog())?;
    assert!(channel.test_connection(TIMEOUT).await.success);

    let items = channel.fetch_entities(EntityType::Table, TIMEOUT).await?;
    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["res_partner", "sale_order"]);
    assert!(items.iter().all(|i| i.source == SourceKind::Api));

    // Entity types outside the catalog are not requested.
    assert!(channel.fetch_entities(EntityType::Module, TIMEOUT).await?.is_empty());
    Ok(())
}

/// Test HTTP failures during extraction are channel errors
#[tokio::test]
async fn test_jsonrpc_fetch_http_failure() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, json!(2)).await;
    mount_call(&server, "\"ir.model\"", ResponseTemplate::new(500)).await;

    let mut channel = channel_for(&server, table_catalog())?;
    assert!(channel.test_connection(TIMEOUT).await.success);

    let error = channel
        .fetch_entities(EntityType::Table, TIMEOUT)
        .await
        .expect_err("HTTP 500 should fail");
    assert!(matches!(error, DbVaultError::Channel { .. }));
    assert!(error.to_string().contains("HTTP 500"));
    Ok(())
}

/// Test close drops the session
#[tokio::test]
async fn test_jsonrpc_close_clears_session() -> Result<()> {
    let server = MockServer::start().await;
    mount_login(&server, json!(2)).await;

    let mut channel = channel_for(&server, table_catalog())?;
    assert!(channel.test_connection(TIMEOUT).await.success);
    channel.close().await;

    assert!(channel.fetch_entities(EntityType::Table, TIMEOUT).await.is_err());
    Ok(())
}

// =============================================================================
// Vault Integration
// =============================================================================

/// Test a remote-instance record drives the channel end to end
#[tokio::test]
async fn test_jsonrpc_endpoint_from_vault_record() -> Result<()> {
    let server = MockServer::start().await;
    mount_call(
        &server,
        "\"version\"",
        rpc_result(json!({"server_version": "17.0"})),
    )
    .await;
    // Login only succeeds with the decrypted API key.
    mount_call(&server, "vault-api-key", rpc_result(json!(7))).await;

    let vault = ConfigVault::new(
        Arc::new(MemoryConfigStore::new()),
        SecretCipher::new(&DerivedKey::from_bytes([3u8; 32])),
        ConnectionValidator::default(),
        VaultConfig::default(),
    )?;
    vault
        .save(
            ConfigDraft::new("acme", ConfigKind::RemoteInstance)
                .with_field("url", server.uri())
                .with_field("database", "acme")
                .with_field("username", "inventory-bot")
                .with_secret("vault-api-key"),
        )
        .await?;

    let resolved = vault.get("acme").await?.expect("remote record");
    let endpoint = RemoteEndpoint::from_resolved(&resolved)?;
    assert_eq!(endpoint.database, "acme");

    let mut channel = JsonRpcApiChannel::new(endpoint, &ConnectionValidator::default())?;
    let probe = channel.test_connection(TIMEOUT).await;
    assert!(probe.success, "{}", probe.message);
    assert!(probe.message.contains("uid 7"));
    Ok(())
}
