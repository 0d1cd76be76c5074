//! JSON-RPC remote-API channel.
//!
//! Talks to the `/jsonrpc` endpoint of an Odoo-style server:
//! `common.version` and `common.authenticate` for the connection test, then
//! `object.execute_kw(..., "search_read", ...)` per entity type as described
//! by an [`ApiCatalog`].

use super::{ApiChannel, ApiProbe};
use crate::Result;
use crate::error::{DbVaultError, redact_database_url};
use crate::models::{ConfigKind, EntityType, InventoryItem, SourceKind};
use crate::validation::ConnectionValidator;
use crate::vault::ResolvedConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use zeroize::Zeroizing;

const CHANNEL: &str = "API";

/// How one entity type is read through `search_read`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiModel {
    /// Remote model name (`ir.module.module`)
    pub model: String,
    /// `search_read` domain
    pub domain: Value,
    /// Fields to read; every field except `name_field` becomes an attribute
    pub fields: Vec<String>,
    /// Field holding the entity name
    pub name_field: String,
}

impl ApiModel {
    /// Creates a model reading `fields`, named by the first field.
    pub fn new(model: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            model: model.into(),
            domain: json!([]),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            name_field: fields.first().map_or_else(|| "name".to_string(), |f| (*f).to_string()),
        }
    }

    /// Builder method to set the search domain.
    pub fn with_domain(mut self, domain: Value) -> Self {
        self.domain = domain;
        self
    }
}

/// Remote models read for each entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCatalog {
    models: BTreeMap<EntityType, ApiModel>,
}

impl Default for ApiCatalog {
    fn default() -> Self {
        Self::odoo()
    }
}

impl ApiCatalog {
    /// Creates an empty catalog.
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    /// Standard Odoo models.
    ///
    /// Field lists mirror the columns of the PostgreSQL introspection
    /// catalog so that attributes can be compared.
    pub fn odoo() -> Self {
        Self::empty()
            .with_model(
                EntityType::Module,
                ApiModel::new("ir.module.module", &["name", "state", "latest_version"])
                    .with_domain(json!([["state", "=", "installed"]])),
            )
            .with_model(EntityType::Role, ApiModel::new("res.groups", &["name"]))
            .with_model(EntityType::Table, ApiModel::new("ir.model", &["model"]))
            .with_model(EntityType::Property, ApiModel::new("ir.config_parameter", &["key"]))
            .with_model(
                EntityType::ScheduledJob,
                ApiModel::new(
                    "ir.cron",
                    &["cron_name", "active", "interval_number", "interval_type"],
                ),
            )
    }

    /// Builder method to set the model for an entity type.
    pub fn with_model(mut self, entity_type: EntityType, model: ApiModel) -> Self {
        self.models.insert(entity_type, model);
        self
    }

    /// Model for one entity type.
    pub fn model(&self, entity_type: EntityType) -> Option<&ApiModel> {
        self.models.get(&entity_type)
    }
}

/// Address and credentials of a remote instance.
#[derive(Clone)]
pub struct RemoteEndpoint {
    /// Base URL of the instance
    pub url: String,
    /// Database name on the instance
    pub database: String,
    /// Login used for authentication
    pub username: String,
    api_key: Zeroizing<String>,
}

impl std::fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("url", &redact_database_url(&self.url))
            .field("database", &self.database)
            .field("username", &self.username)
            .field("api_key", &"****")
            .finish()
    }
}

impl RemoteEndpoint {
    /// Creates an endpoint.
    pub fn new(
        url: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            username: username.into(),
            api_key: Zeroizing::new(api_key.into()),
        }
    }

    /// Builds an endpoint from a saved remote-instance record.
    ///
    /// # Errors
    /// Returns a configuration error for other record kinds or when a
    /// required field is missing.
    pub fn from_resolved(config: &ResolvedConfig) -> Result<Self> {
        if config.record.kind != ConfigKind::RemoteInstance {
            return Err(DbVaultError::configuration(format!(
                "'{}' is not a remote instance",
                config.record.name
            )));
        }
        let field = |key: &str| {
            config.record.field(key).map(str::to_string).ok_or_else(|| {
                DbVaultError::configuration(format!(
                    "'{}' is missing field {}",
                    config.record.name, key
                ))
            })
        };
        Ok(Self::new(
            field("url")?,
            field("database")?,
            field("username")?,
            config.secret.expose(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: Option<String>,
}

impl RpcError {
    fn describe(&self) -> String {
        match self.data.as_ref().and_then(|d| d.message.as_deref()) {
            Some(detail) if !detail.is_empty() => format!("{}: {}", self.message, detail),
            _ => self.message.clone(),
        }
    }
}

/// [`ApiChannel`] over JSON-RPC with `reqwest`.
#[derive(Debug)]
pub struct JsonRpcApiChannel {
    client: reqwest::Client,
    endpoint: RemoteEndpoint,
    rpc_url: String,
    catalog: ApiCatalog,
    uid: Option<i64>,
    next_id: AtomicU64,
}

impl JsonRpcApiChannel {
    /// Creates a channel for an endpoint whose URL the validator accepts.
    ///
    /// Validator warnings (untrusted host, plain HTTP) are logged and do not
    /// block.
    ///
    /// # Errors
    /// Returns `Validation` when the URL is rejected.
    pub fn new(endpoint: RemoteEndpoint, validator: &ConnectionValidator) -> Result<Self> {
        let validation = validator.validate_url(&endpoint.url);
        for warning in &validation.warnings {
            warn!("Remote endpoint {}: {}", redact_database_url(&endpoint.url), warning);
        }
        validation.into_result()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("dbvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DbVaultError::channel(CHANNEL, format!("Failed to build HTTP client: {}", e))
            })?;
        let rpc_url = format!("{}/jsonrpc", endpoint.url.trim().trim_end_matches('/'));

        Ok(Self {
            client,
            endpoint,
            rpc_url,
            catalog: ApiCatalog::default(),
            uid: None,
            next_id: AtomicU64::new(1),
        })
    }

    /// Builder method to replace the model catalog.
    pub fn with_catalog(mut self, catalog: ApiCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    async fn call(&self, service: &str, method: &str, args: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": id,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                DbVaultError::channel(CHANNEL, format!("{} request failed: {}", method, e.without_url()))
            })?;

        if !response.status().is_success() {
            return Err(DbVaultError::channel(
                CHANNEL,
                format!("{} returned HTTP {}", method, response.status()),
            ));
        }

        let envelope: RpcResponse = response.json().await.map_err(|e| {
            DbVaultError::channel(CHANNEL, format!("{} returned invalid JSON: {}", method, e.without_url()))
        })?;
        if let Some(error) = envelope.error {
            return Err(DbVaultError::channel(
                CHANNEL,
                format!("{} failed: {}", method, error.describe()),
            ));
        }
        envelope
            .result
            .ok_or_else(|| DbVaultError::channel(CHANNEL, format!("{} returned no result", method)))
    }

    async fn authenticate(&self, timeout: Duration) -> Result<(i64, String)> {
        let version = self.call("common", "version", json!([]), timeout).await?;
        let server_version = version
            .get("server_version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let uid = self
            .call(
                "common",
                "authenticate",
                json!([
                    self.endpoint.database,
                    self.endpoint.username,
                    self.endpoint.api_key.as_str(),
                    {}
                ]),
                timeout,
            )
            .await?;

        // A rejected login is `false`, not an RPC error.
        let uid = uid.as_i64().ok_or_else(|| {
            DbVaultError::channel(
                CHANNEL,
                format!("Authentication rejected for user {}", self.endpoint.username),
            )
        })?;
        Ok((uid, server_version))
    }
}

#[async_trait]
impl ApiChannel for JsonRpcApiChannel {
    async fn test_connection(&mut self, timeout: Duration) -> ApiProbe {
        let started = Instant::now();
        let outcome = self.authenticate(timeout).await;
        let latency = started.elapsed();

        match outcome {
            Ok((uid, server_version)) => {
                self.uid = Some(uid);
                debug!("Authenticated against {} as uid {}", self.describe(), uid);
                ApiProbe {
                    success: true,
                    message: format!("Authenticated as uid {} (server {})", uid, server_version),
                    latency,
                }
            }
            Err(e) => {
                self.uid = None;
                ApiProbe {
                    success: false,
                    message: e.to_string(),
                    latency,
                }
            }
        }
    }

    async fn fetch_entities(
        &self,
        entity_type: EntityType,
        timeout: Duration,
    ) -> Result<Vec<InventoryItem>> {
        let uid = self
            .uid
            .ok_or_else(|| DbVaultError::channel(CHANNEL, "Channel is not authenticated"))?;
        let Some(model) = self.catalog.model(entity_type) else {
            return Ok(Vec::new());
        };

        let result = self
            .call(
                "object",
                "execute_kw",
                json!([
                    self.endpoint.database,
                    uid,
                    self.endpoint.api_key.as_str(),
                    model.model,
                    "search_read",
                    [model.domain],
                    { "fields": model.fields },
                ]),
                timeout,
            )
            .await?;

        let records = result.as_array().ok_or_else(|| {
            DbVaultError::channel(
                CHANNEL,
                format!("search_read on {} did not return a list", model.model),
            )
        })?;

        let items: Vec<InventoryItem> = records
            .iter()
            .filter_map(|record| item_from_record(entity_type, model, record))
            .collect();
        debug!("Fetched {} {} items from {}", items.len(), entity_type, model.model);
        Ok(items)
    }

    async fn close(&mut self) {
        self.uid = None;
    }

    fn describe(&self) -> String {
        format!(
            "{} (database {})",
            redact_database_url(&self.endpoint.url),
            self.endpoint.database
        )
    }
}

/// Converts one `search_read` record into an item.
///
/// Table entities are named after the model with `.` replaced by `_`, which
/// is the name of the table backing the model.
fn item_from_record(entity_type: EntityType, model: &ApiModel, record: &Value) -> Option<InventoryItem> {
    let name = record.get(&model.name_field).and_then(Value::as_str)?;
    let name = match entity_type {
        EntityType::Table => name.replace('.', "_"),
        _ => name.to_string(),
    };

    let mut item = InventoryItem::new(SourceKind::Api, entity_type, name);
    for field in model.fields.iter().filter(|f| **f != model.name_field) {
        if let Some(value) = record.get(field).and_then(render_value) {
            item.attributes.insert(field.clone(), value);
        }
    }
    Some(item)
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Many2one values are `[id, display_name]`.
        Value::Array(pair) if pair.len() == 2 => pair.get(1).and_then(Value::as_str).map(str::to_string),
        other => Some(other.to_string()),
    }
}
