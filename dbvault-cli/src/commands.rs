//! Command handlers.

use crate::output::{self, ConnectionView, RecordView};
use crate::secret::read_secret;
use crate::{
    CommandOutput, ConfigCommand, CorrelateArgs, GlobalArgs, InventoryArgs, SaveArgs,
    ValidateCommand,
};
use anyhow::{Context, anyhow, bail};
use dbvault_core::vault::{ResolvedConfig, SaveOutcome};
use dbvault_core::{
    ConfigDraft, ConfigKind, ConfigStore, ConfigVault, ConnectionValidator, CorrelationEngine,
    DualSourceConnector, EnvironmentInputs, RateLimiter, Settings,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Loads settings from `--config`, or defaults.
fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::from_json_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

/// Validator guarded by the configured rate limiter.
fn build_validator(settings: &Settings) -> anyhow::Result<(ConnectionValidator, Arc<RateLimiter>)> {
    let limiter = Arc::new(RateLimiter::from_config(&settings.rate_limit)?);
    let validator =
        ConnectionValidator::new(settings.validator.clone())?.with_rate_limiter(limiter.clone());
    Ok((validator, limiter))
}

#[cfg(feature = "sqlite")]
async fn open_store(path: &Path) -> anyhow::Result<Arc<dyn ConfigStore>> {
    let store = dbvault_core::vault::SqliteConfigStore::open(path)
        .await
        .with_context(|| format!("Failed to open configuration store {}", path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store(_path: &Path) -> anyhow::Result<Arc<dyn ConfigStore>> {
    bail!("The configuration store requires the sqlite feature")
}

/// Opens the store and derives the vault key from the environment.
///
/// Fails when the cipher self-test fails, so nothing is written under a
/// broken key.
async fn open_vault(global: &GlobalArgs, settings: &Settings) -> anyhow::Result<ConfigVault> {
    let store = open_store(&global.store).await?;
    let vault = ConfigVault::from_environment(store, &EnvironmentInputs::from_env(), settings)
        .context("Failed to initialize the configuration vault")?;
    Ok(vault)
}

async fn require(vault: &ConfigVault, name: &str) -> anyhow::Result<ResolvedConfig> {
    vault
        .get(name)
        .await?
        .ok_or_else(|| anyhow!("No active configuration named '{}'", name))
}

// =============================================================================
// validate
// =============================================================================

pub(crate) async fn validate(
    global: &GlobalArgs,
    command: &ValidateCommand,
) -> anyhow::Result<CommandOutput> {
    let settings = load_settings(global.config.as_deref())?;
    let (validator, _) = build_validator(&settings)?;

    match command {
        ValidateCommand::Url { url } => {
            let result = validator.validate_url(url);
            Ok(CommandOutput::with_status(output::to_json(&result)?, result.valid))
        }
        ValidateCommand::Connection {
            connection_string,
            probe,
        } => {
            let outcome = if *probe {
                validator
                    .validate_connection_string_live(
                        connection_string,
                        settings.validator.probe_timeout(),
                    )
                    .await
            } else {
                validator.validate_connection_string(connection_string)
            };
            let valid = outcome.result.valid;
            Ok(CommandOutput::with_status(
                output::to_json(&ConnectionView::from(&outcome))?,
                valid,
            ))
        }
        ValidateCommand::Query { query } => {
            let result = validator.validate_query(query);
            Ok(CommandOutput::with_status(output::to_json(&result)?, result.valid))
        }
        ValidateCommand::Credentials { username } => {
            let password = read_secret(&format!("Password for {}: ", username))?;
            let outcome = validator.validate_credentials(username, &password);
            let valid = outcome.result.valid;
            Ok(CommandOutput::with_status(output::to_json(&outcome)?, valid))
        }
    }
}

// =============================================================================
// config
// =============================================================================

pub(crate) async fn config(
    global: &GlobalArgs,
    command: &ConfigCommand,
) -> anyhow::Result<CommandOutput> {
    let settings = load_settings(global.config.as_deref())?;

    // Refuse before deriving the key so that a missing flag costs nothing.
    if let ConfigCommand::Purge { name, yes: false } = command {
        bail!("Refusing to purge '{}' without --yes", name);
    }

    let vault = open_vault(global, &settings).await?;

    match command {
        ConfigCommand::Save(args) => save(&vault, args).await,
        ConfigCommand::Get { name } => {
            let resolved = require(&vault, name).await?;
            Ok(CommandOutput::ok(output::to_json(&RecordView::from(
                &resolved.record,
            ))?))
        }
        ConfigCommand::List { kind, all } => {
            let kind = kind.map(ConfigKind::from);
            let records = if *all {
                vault.list_all().await?
            } else {
                let mut records = Vec::new();
                for listed in [ConfigKind::DatabaseConnection, ConfigKind::RemoteInstance] {
                    records.extend(vault.list_active(listed).await?.into_iter().map(|r| r.record));
                }
                records.sort_by(|a, b| a.name.cmp(&b.name));
                records
            };
            let views: Vec<RecordView> = records
                .iter()
                .filter(|r| kind.is_none_or(|k| r.kind == k))
                .map(RecordView::from)
                .collect();
            Ok(CommandOutput::ok(output::to_json(&views)?))
        }
        ConfigCommand::Deactivate { name } => {
            if vault.deactivate(name).await? {
                Ok(CommandOutput::ok(format!("Deactivated '{}'", name)))
            } else {
                bail!("No configuration named '{}'", name)
            }
        }
        ConfigCommand::Purge { name, .. } => {
            if vault.hard_delete(name).await? {
                Ok(CommandOutput::ok(format!("Purged '{}'", name)))
            } else {
                bail!("No configuration named '{}'", name)
            }
        }
        ConfigCommand::Reload => {
            let outcome = vault.reload_from_backing_store().await;
            let success = !matches!(outcome, dbvault_core::ReloadOutcome::Failed(_));
            Ok(CommandOutput::with_status(
                output::describe_reload(&outcome),
                success,
            ))
        }
        ConfigCommand::Reencrypt => {
            let rewritten = vault.reencrypt_legacy().await?;
            Ok(CommandOutput::ok(format!(
                "Re-encrypted {} legacy secret(s)",
                rewritten
            )))
        }
    }
}

/// Builds a draft from the save flags.
fn draft_from_args(args: &SaveArgs) -> ConfigDraft {
    let mut draft = ConfigDraft::new(args.name.clone(), args.kind.into());
    let fields = [
        ("db_type", args.db_type.clone()),
        ("host", args.host.clone()),
        ("port", args.port.map(|p| p.to_string())),
        ("database", args.database.clone()),
        ("username", args.username.clone()),
        ("url", args.url.clone()),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            draft = draft.with_field(key, value);
        }
    }
    for (key, value) in &args.params {
        draft = draft.with_field(
            format!("{}{}", dbvault_core::security::PARAM_FIELD_PREFIX, key),
            value.clone(),
        );
    }
    draft
}

async fn save(vault: &ConfigVault, args: &SaveArgs) -> anyhow::Result<CommandOutput> {
    let mut draft = draft_from_args(args);
    if !args.no_secret {
        let secret = read_secret(&format!("Secret for '{}': ", args.name))?;
        draft = draft.with_secret(secret.as_str());
    }

    let outcome = vault.save(draft).await?;
    let verb = match outcome {
        SaveOutcome::Inserted => "Saved",
        SaveOutcome::Updated => "Updated",
    };
    Ok(CommandOutput::ok(format!("{} '{}'", verb, args.name.trim())))
}

// =============================================================================
// inventory
// =============================================================================

pub(crate) async fn inventory(
    global: &GlobalArgs,
    args: &InventoryArgs,
) -> anyhow::Result<CommandOutput> {
    let settings = load_settings(global.config.as_deref())?;
    let (validator, limiter) = build_validator(&settings)?;
    let vault = open_vault(global, &settings).await?;

    let remote = require(&vault, &args.remote).await?;
    let database = require(&vault, &args.database).await?;

    let mut connector = DualSourceConnector::new(settings.connector)?.with_rate_limiter(limiter);
    connector = with_api_channel(connector, &remote, &validator)?;
    connector = with_introspection_channel(connector, &database, &validator)?;

    let report = connector.establish_all().await;
    for error in &report.errors {
        warn!("{}", error);
    }

    let result = connector.get_hybrid_inventory().await;
    connector.close().await;
    let result = result?;
    info!(
        "Inventory correlated: {} matched, score {:.2}",
        result.correlation.matched.len(),
        result.correlation.score
    );

    let text = output::emit(output::to_json(&result)?, args.output.as_deref()).await?;
    Ok(CommandOutput::ok(text))
}

#[cfg(feature = "remote-api")]
fn with_api_channel(
    connector: DualSourceConnector,
    remote: &ResolvedConfig,
    validator: &ConnectionValidator,
) -> anyhow::Result<DualSourceConnector> {
    use dbvault_core::connector::{JsonRpcApiChannel, RemoteEndpoint};

    let endpoint = RemoteEndpoint::from_resolved(remote)?;
    let channel = JsonRpcApiChannel::new(endpoint, validator)?;
    Ok(connector.with_api_channel(Box::new(channel)))
}

#[cfg(not(feature = "remote-api"))]
fn with_api_channel(
    connector: DualSourceConnector,
    remote: &ResolvedConfig,
    _validator: &ConnectionValidator,
) -> anyhow::Result<DualSourceConnector> {
    warn!(
        "Remote API channel not compiled in; skipping '{}'",
        remote.record.name
    );
    Ok(connector)
}

#[cfg(any(feature = "postgresql", feature = "mysql", feature = "sqlite"))]
fn with_introspection_channel(
    connector: DualSourceConnector,
    database: &ResolvedConfig,
    validator: &ConnectionValidator,
) -> anyhow::Result<DualSourceConnector> {
    use dbvault_core::IntrospectionCatalog;
    use dbvault_core::connector::SqlIntrospectionChannel;

    let descriptor = database.descriptor()?;
    let catalog = IntrospectionCatalog::for_backend(descriptor.backend)?;
    if catalog.is_empty() {
        warn!(
            "No introspection queries for {}; skipping '{}'",
            descriptor.backend, database.record.name
        );
        return Ok(connector);
    }
    let channel = SqlIntrospectionChannel::new(descriptor, validator)?;
    Ok(connector.with_introspection_channel(Box::new(channel), catalog))
}

#[cfg(not(any(feature = "postgresql", feature = "mysql", feature = "sqlite")))]
fn with_introspection_channel(
    connector: DualSourceConnector,
    database: &ResolvedConfig,
    _validator: &ConnectionValidator,
) -> anyhow::Result<DualSourceConnector> {
    warn!(
        "No database driver compiled in; skipping '{}'",
        database.record.name
    );
    Ok(connector)
}

// =============================================================================
// correlate
// =============================================================================

pub(crate) async fn correlate(args: &CorrelateArgs) -> anyhow::Result<CommandOutput> {
    let api = output::read_inventory(&args.api).await?;
    let introspection = output::read_inventory(&args.introspection).await?;

    let result = CorrelationEngine::new().correlate(&api, &introspection);
    let report = output::CorrelationReport {
        breakdown: result.breakdown(),
        correlation: result,
    };

    let text = output::emit(output::to_json(&report)?, args.output.as_deref()).await?;
    Ok(CommandOutput::ok(text))
}
