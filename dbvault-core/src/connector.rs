//! Dual-source inventory acquisition.
//!
//! A [`DualSourceConnector`] owns two independent channels against the same
//! logical target: a remote-API channel ([`ApiChannel`]) and a
//! direct-introspection channel ([`IntrospectionChannel`]). Each channel is
//! established and extracted on its own; a failure in one never aborts the
//! other, and results from a single channel are still correlated.
//!
//! # Security
//! - Concrete channels validate their target before it can be dialed
//! - The introspection channel only executes [`ReadOnlyQuery`] values
//! - Establishment attempts are guarded by a shared [`RateLimiter`]
//!
//! # Object Safety
//! Both channel traits are object-safe; the connector holds boxed trait
//! objects so that tests can substitute mock channels.

mod introspection;

#[cfg(feature = "remote-api")]
mod api;

#[cfg(feature = "remote-api")]
pub use api::{ApiCatalog, ApiModel, JsonRpcApiChannel, RemoteEndpoint};
pub use introspection::IntrospectionCatalog;
#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
pub use introspection::SqlIntrospectionChannel;

use crate::Result;
use crate::config::ConnectorConfig;
use crate::correlation::{CorrelationEngine, CorrelationResult};
use crate::error::{DbVaultError, with_timeout};
use crate::models::{EntityType, InventoryItem, SourceKind};
use crate::rate_limit::RateLimiter;
use crate::validation::ReadOnlyQuery;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of a remote-API connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiProbe {
    /// True when authentication succeeded
    pub success: bool,
    /// Session summary on success, failure reason otherwise
    pub message: String,
    /// Wall-clock time of the attempt
    pub latency: Duration,
}

/// Remote-API collaborator.
///
/// Implementations authenticate in `test_connection` and keep whatever
/// session state they need for `fetch_entities`.
#[async_trait]
pub trait ApiChannel: Send + Sync {
    /// Authenticates and reports the outcome with its latency.
    ///
    /// Never returns an error: failures are reported through
    /// [`ApiProbe::success`] and [`ApiProbe::message`].
    async fn test_connection(&mut self, timeout: Duration) -> ApiProbe;

    /// Fetches every entity of one type.
    ///
    /// Types the channel does not know are an empty list.
    ///
    /// # Errors
    /// Returns a channel error when the channel is not authenticated or the
    /// remote call fails.
    async fn fetch_entities(
        &self,
        entity_type: EntityType,
        timeout: Duration,
    ) -> Result<Vec<InventoryItem>>;

    /// Drops the session. Idempotent.
    async fn close(&mut self);

    /// Short description for logs (never contains credentials).
    fn describe(&self) -> String;
}

/// Direct-introspection collaborator.
///
/// Only [`ReadOnlyQuery`] values can be executed, so raw caller-supplied
/// text never reaches the database.
#[async_trait]
pub trait IntrospectionChannel: Send + Sync {
    /// Opens the connection.
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// True when the open connection answers a trivial query.
    async fn test_connection(&self, timeout: Duration) -> bool;

    /// Executes a validated read-only query.
    ///
    /// Each row is a map of column name to text value; NULLs are omitted.
    async fn query(
        &self,
        query: &ReadOnlyQuery,
        timeout: Duration,
    ) -> Result<Vec<BTreeMap<String, String>>>;

    /// Releases the connection. Idempotent.
    async fn close(&mut self);

    /// Short description for logs (never contains credentials).
    fn describe(&self) -> String;
}

/// Outcome of [`DualSourceConnector::establish_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EstablishReport {
    /// API channel authenticated
    pub api_connected: bool,
    /// Introspection channel opened and answered
    pub introspection_connected: bool,
    /// One message per failed channel
    pub errors: Vec<String>,
    /// Result of the API connection test, when one was attempted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_probe: Option<ApiProbe>,
}

impl EstablishReport {
    /// True when at least one channel is connected.
    pub fn connected(&self) -> bool {
        self.api_connected || self.introspection_connected
    }
}

/// Outcome of [`DualSourceConnector::get_hybrid_inventory`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    /// Items from both channels, ordered by entity type, name and source
    pub items: Vec<InventoryItem>,
    /// Comparison of the two inventories
    pub correlation: CorrelationResult,
    /// Per-channel extraction failures
    pub errors: Vec<String>,
    /// API channel took part in this run
    pub api_connected: bool,
    /// Introspection channel took part in this run
    pub introspection_connected: bool,
    /// When extraction finished
    pub collected_at: DateTime<Utc>,
}

impl HybridResult {
    /// Items reported by one source.
    pub fn items_from(&self, source: SourceKind) -> impl Iterator<Item = &InventoryItem> {
        self.items.iter().filter(move |item| item.source == source)
    }
}

/// Owns the two acquisition channels and merges their inventories.
pub struct DualSourceConnector {
    config: ConnectorConfig,
    api: Option<Box<dyn ApiChannel>>,
    introspection: Option<Box<dyn IntrospectionChannel>>,
    catalog: IntrospectionCatalog,
    limiter: Option<Arc<RateLimiter>>,
    engine: CorrelationEngine,
    api_connected: bool,
    introspection_connected: bool,
    closed: bool,
}

impl std::fmt::Debug for DualSourceConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualSourceConnector")
            .field("api", &self.api.as_ref().map(|c| c.describe()))
            .field(
                "introspection",
                &self.introspection.as_ref().map(|c| c.describe()),
            )
            .field("api_connected", &self.api_connected)
            .field("introspection_connected", &self.introspection_connected)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl DualSourceConnector {
    /// Creates a connector without channels.
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            api: None,
            introspection: None,
            catalog: IntrospectionCatalog::new(),
            limiter: None,
            engine: CorrelationEngine::new(),
            api_connected: false,
            introspection_connected: false,
            closed: false,
        })
    }

    /// Builder method to attach the remote-API channel.
    pub fn with_api_channel(mut self, channel: Box<dyn ApiChannel>) -> Self {
        self.api = Some(channel);
        self
    }

    /// Builder method to attach the introspection channel and the queries it
    /// runs per entity type.
    pub fn with_introspection_channel(
        mut self,
        channel: Box<dyn IntrospectionChannel>,
        catalog: IntrospectionCatalog,
    ) -> Self {
        self.introspection = Some(channel);
        self.catalog = catalog;
        self
    }

    /// Builder method to guard establishment with a shared rate limiter.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// True when the API channel is connected.
    pub fn api_connected(&self) -> bool {
        self.api_connected
    }

    /// True when the introspection channel is connected.
    pub fn introspection_connected(&self) -> bool {
        self.introspection_connected
    }

    /// Attempts both channels concurrently, each bound by the connect
    /// timeout.
    ///
    /// Single attempt, no retry. A failure on one channel never aborts the
    /// other; every failure is logged once and listed in the report.
    pub async fn establish_all(&mut self) -> EstablishReport {
        let timeout = self.config.connect_timeout();
        self.establish_all_with_timeout(timeout).await
    }

    /// Same as [`establish_all`](Self::establish_all) with an explicit
    /// per-channel timeout in place of the configured one.
    pub async fn establish_all_with_timeout(&mut self, timeout: Duration) -> EstablishReport {
        let mut report = EstablishReport::default();
        if self.closed {
            report.errors.push("Connector is closed".to_string());
            return report;
        }

        let limiter = self.limiter.as_deref();
        let api = self.api.as_deref_mut();
        let introspection = self.introspection.as_deref_mut();

        let api_attempt = async move {
            match api {
                Some(channel) => Some(establish_api(channel, limiter, timeout).await),
                None => None,
            }
        };
        let introspection_attempt = async move {
            match introspection {
                Some(channel) => Some(establish_introspection(channel, limiter, timeout).await),
                None => None,
            }
        };
        let (api_outcome, introspection_outcome) =
            futures::join!(api_attempt, introspection_attempt);

        match api_outcome {
            Some(Ok(probe)) => {
                report.api_connected = true;
                report.api_probe = Some(probe);
            }
            Some(Err((message, probe))) => {
                error!("{}", message);
                report.errors.push(message);
                report.api_probe = probe;
            }
            None => debug!("No API channel configured"),
        }
        match introspection_outcome {
            Some(Ok(())) => report.introspection_connected = true,
            Some(Err(message)) => {
                error!("{}", message);
                report.errors.push(message);
            }
            None => debug!("No introspection channel configured"),
        }

        self.api_connected = report.api_connected;
        self.introspection_connected = report.introspection_connected;
        info!(
            "Channels established: API={}, introspection={}",
            report.api_connected, report.introspection_connected
        );
        report
    }

    /// Pulls every entity type from each connected channel and correlates
    /// the two inventories.
    ///
    /// Partial success is reported: extraction errors are listed in the
    /// result and the items that were collected are kept.
    ///
    /// # Errors
    /// Returns a channel error when no channel is connected.
    pub async fn get_hybrid_inventory(&self) -> Result<HybridResult> {
        self.get_hybrid_inventory_with_timeout(self.config.extraction_timeout())
            .await
    }

    /// Same as [`get_hybrid_inventory`](Self::get_hybrid_inventory) with an
    /// explicit per-call extraction timeout.
    ///
    /// # Errors
    /// Returns a channel error when no channel is connected.
    pub async fn get_hybrid_inventory_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<HybridResult> {
        if self.closed || !(self.api_connected || self.introspection_connected) {
            return Err(DbVaultError::channel(
                "hybrid",
                "No channel is connected; call establish_all first",
            ));
        }

        let api = self.api.as_deref().filter(|_| self.api_connected);
        let introspection = self
            .introspection
            .as_deref()
            .filter(|_| self.introspection_connected);
        let catalog = &self.catalog;

        let api_extraction = async move {
            match api {
                Some(channel) => extract_api(channel, timeout).await,
                None => (Vec::new(), Vec::new()),
            }
        };
        let introspection_extraction = async move {
            match introspection {
                Some(channel) => extract_introspection(channel, catalog, timeout).await,
                None => (Vec::new(), Vec::new()),
            }
        };
        let ((api_items, api_errors), (db_items, db_errors)) =
            futures::join!(api_extraction, introspection_extraction);

        let correlation = self.engine.correlate(&api_items, &db_items);
        let mut errors = api_errors;
        errors.extend(db_errors);
        for message in &errors {
            warn!("{}", message);
        }

        let mut items = api_items;
        items.extend(db_items);
        items.sort_by(|a, b| {
            (a.entity_type, &a.name, a.source).cmp(&(b.entity_type, &b.name, b.source))
        });

        info!(
            "Hybrid inventory: {} items, {} matched, score {:.2}",
            items.len(),
            correlation.matched.len(),
            correlation.score
        );

        Ok(HybridResult {
            items,
            correlation,
            errors,
            api_connected: self.api_connected,
            introspection_connected: self.introspection_connected,
            collected_at: Utc::now(),
        })
    }

    /// Releases both channels. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(channel) = self.api.as_deref_mut() {
            channel.close().await;
        }
        if let Some(channel) = self.introspection.as_deref_mut() {
            channel.close().await;
        }
        self.api_connected = false;
        self.introspection_connected = false;
        self.closed = true;
        debug!("Connector closed");
    }
}

fn check_rate_limit(limiter: Option<&RateLimiter>, channel: &str) -> std::result::Result<(), String> {
    match limiter {
        Some(limiter) if !limiter.allow() => Err(DbVaultError::rate_limited(format!(
            "{} channel establishment",
            channel
        ))
        .to_string()),
        _ => Ok(()),
    }
}

async fn establish_api(
    channel: &mut dyn ApiChannel,
    limiter: Option<&RateLimiter>,
    timeout: Duration,
) -> std::result::Result<ApiProbe, (String, Option<ApiProbe>)> {
    check_rate_limit(limiter, "API").map_err(|message| (message, None))?;

    let description = channel.describe();
    let probe = with_timeout("API channel establishment", timeout, async {
        Ok(channel.test_connection(timeout).await)
    })
    .await
    .map_err(|e| (DbVaultError::channel("API", e.to_string()).to_string(), None))?;

    if probe.success {
        debug!("API channel {} connected in {:?}", description, probe.latency);
        Ok(probe)
    } else {
        let message = DbVaultError::channel("API", probe.message.clone()).to_string();
        Err((message, Some(probe)))
    }
}

async fn establish_introspection(
    channel: &mut dyn IntrospectionChannel,
    limiter: Option<&RateLimiter>,
    timeout: Duration,
) -> std::result::Result<(), String> {
    check_rate_limit(limiter, "introspection")?;

    let description = channel.describe();
    let connected = with_timeout("introspection channel establishment", timeout, async {
        channel.connect(timeout).await?;
        Ok(channel.test_connection(timeout).await)
    })
    .await;

    match connected {
        Ok(true) => {
            debug!("Introspection channel {} connected", description);
            Ok(())
        }
        Ok(false) => Err(DbVaultError::channel(
            "introspection",
            "Connection test query failed",
        )
        .to_string()),
        Err(e) => Err(DbVaultError::channel("introspection", e.to_string()).to_string()),
    }
}

async fn extract_api(
    channel: &dyn ApiChannel,
    timeout: Duration,
) -> (Vec<InventoryItem>, Vec<String>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();

    let extraction = with_timeout("API extraction", timeout, async {
        for entity_type in EntityType::ALL {
            match channel.fetch_entities(entity_type, timeout).await {
                Ok(fetched) => items.extend(fetched.into_iter().map(|mut item| {
                    item.source = SourceKind::Api;
                    item
                })),
                Err(e) => errors.push(format!("API {}: {}", entity_type, e)),
            }
        }
        Ok(())
    })
    .await;

    if let Err(e) = extraction {
        errors.push(format!("API: {}", e));
    }
    (items, errors)
}

async fn extract_introspection(
    channel: &dyn IntrospectionChannel,
    catalog: &IntrospectionCatalog,
    timeout: Duration,
) -> (Vec<InventoryItem>, Vec<String>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();

    let extraction = with_timeout("introspection extraction", timeout, async {
        for (entity_type, query) in catalog.queries() {
            match channel.query(query, timeout).await {
                Ok(rows) => {
                    let (fetched, unnamed) = introspection::items_from_rows(entity_type, rows);
                    if unnamed > 0 {
                        errors.push(format!(
                            "introspection {}: {} rows without a name column",
                            entity_type, unnamed
                        ));
                    }
                    items.extend(fetched);
                }
                Err(e) => errors.push(format!("introspection {}: {}", entity_type, e)),
            }
        }
        Ok(())
    })
    .await;

    if let Err(e) = extraction {
        errors.push(format!("introspection: {}", e));
    }
    (items, errors)
}
