//! Library module for the dbvault command-line tool.
//!
//! Argument parsing and command execution live here so that they can be
//! exercised without spawning the binary. `main.rs` only initializes
//! logging, runs [`execute`] and maps the outcome to an exit code.
//!
//! # Security
//! - Secrets are read from `DBVAULT_SECRET` or a hidden prompt, never argv
//! - Stored records are printed without their secret
//! - The vault refuses to start when the cipher self-test fails

mod commands;
pub mod output;
pub mod secret;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dbvault_core::ConfigKind;
use dbvault_core::logging::LogFormat;
use std::path::PathBuf;

/// CLI argument structure
#[derive(Debug, Parser)]
#[command(name = "dbvault")]
#[command(about = "Encrypted connection vault and hybrid inventory tool")]
#[command(version)]
#[command(long_about = "
DBVault - Encrypted connection vault and hybrid inventory

Keeps named database connections and remote-instance credentials with
AES-GCM encrypted secrets, validates every connection target before use,
and reconciles what a remote API reports with what the database holds.

SECURITY FEATURES:
- Secrets encrypted under a key derived from DBVAULT_* environment inputs
- Secrets read from DBVAULT_SECRET or a hidden prompt, never from arguments
- Connection strings, URLs and queries validated before use
- Introspection runs read-only queries only

EXAMPLES:
  dbvault validate url https://acme.odoo.com
  dbvault config save prod --kind database --db-type postgresql --host db1 --database erp --username odoo_ro
  dbvault config reload
  dbvault inventory --remote acme --database prod --output inventory.json
")]
pub struct Cli {
    /// Options shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all log output except errors")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Configuration store file
    #[arg(
        long,
        global = true,
        env = "DBVAULT_STORE",
        default_value = "dbvault.db",
        help = "SQLite file holding the configuration records"
    )]
    pub store: PathBuf,

    /// Settings file
    #[arg(
        long,
        global = true,
        env = "DBVAULT_CONFIG",
        value_name = "FILE",
        help = "JSON settings file (defaults apply when omitted)"
    )]
    pub config: Option<PathBuf>,
}

/// Log format accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate URLs, connection strings, queries and credentials
    #[command(subcommand)]
    Validate(ValidateCommand),
    /// Manage stored configurations
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Collect and correlate the inventory of a remote instance
    Inventory(InventoryArgs),
    /// Correlate two inventory files
    Correlate(CorrelateArgs),
}

/// Targets accepted by `validate`
#[derive(Debug, Subcommand)]
pub enum ValidateCommand {
    /// Validate a remote-instance URL
    Url {
        /// URL to validate
        url: String,
    },
    /// Validate a database connection string
    Connection {
        /// Connection string (read from DBVAULT_CONNECTION when omitted)
        #[arg(env = "DBVAULT_CONNECTION", hide_env_values = true)]
        connection_string: String,

        /// Also probe the target with a single lightweight query
        #[arg(long)]
        probe: bool,
    },
    /// Validate a read-only introspection query
    Query {
        /// SQL text
        query: String,
    },
    /// Score a username and password (password from DBVAULT_SECRET or prompt)
    Credentials {
        /// Account name
        #[arg(long)]
        username: String,
    },
}

/// Record management actions
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a configuration (secret from DBVAULT_SECRET or prompt)
    Save(SaveArgs),
    /// Show one active configuration without its secret
    Get {
        /// Configuration name
        name: String,
    },
    /// List configurations
    List {
        /// Only list this kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Include deactivated configurations
        #[arg(long)]
        all: bool,
    },
    /// Deactivate a configuration (it stays in the store)
    Deactivate {
        /// Configuration name
        name: String,
    },
    /// Permanently delete a configuration
    Purge {
        /// Configuration name
        name: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Reload the default connection from the store
    Reload,
    /// Re-encrypt secrets stored as legacy plaintext
    Reencrypt,
}

/// Configuration kind accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Direct database connection
    Database,
    /// Remote instance reached over its API
    Remote,
}

impl From<KindArg> for ConfigKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Database => ConfigKind::DatabaseConnection,
            KindArg::Remote => ConfigKind::RemoteInstance,
        }
    }
}

/// Arguments of `config save`
#[derive(Debug, Args)]
pub struct SaveArgs {
    /// Configuration name
    pub name: String,

    /// Configuration kind
    #[arg(long, value_enum)]
    pub kind: KindArg,

    /// Database type (postgresql, mysql, sqlite, ...)
    #[arg(long)]
    pub db_type: Option<String>,

    /// Database host
    #[arg(long)]
    pub host: Option<String>,

    /// Database port
    #[arg(long)]
    pub port: Option<u16>,

    /// Database name (file path for SQLite)
    #[arg(long)]
    pub database: Option<String>,

    /// Account name
    #[arg(long)]
    pub username: Option<String>,

    /// Remote-instance URL
    #[arg(long)]
    pub url: Option<String>,

    /// Extra connection parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Save without a secret instead of reading one
    #[arg(long)]
    pub no_secret: bool,
}

/// Arguments of `inventory`
#[derive(Debug, Args)]
pub struct InventoryArgs {
    /// Remote-instance configuration name
    #[arg(long)]
    pub remote: String,

    /// Database-connection configuration name
    #[arg(long)]
    pub database: String,

    /// Write the result to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Arguments of `correlate`
#[derive(Debug, Args)]
pub struct CorrelateArgs {
    /// JSON inventory reported by the remote API
    pub api: PathBuf,

    /// JSON inventory found by introspection
    pub introspection: PathBuf,

    /// Write the result to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Parses a `KEY=VALUE` argument.
fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Text to print and whether the command succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Text for stdout, empty when nothing is printed
    pub text: String,
    /// False maps to a failing exit status
    pub success: bool,
}

impl CommandOutput {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    fn with_status(text: impl Into<String>, success: bool) -> Self {
        Self {
            text: text.into(),
            success,
        }
    }
}

/// Executes the parsed command.
///
/// # Errors
/// Returns an error when the store or settings cannot be opened, the vault
/// key cannot be derived or self-tested, or a vault operation fails.
/// Validation findings are reported in the output, not as errors.
pub async fn execute(cli: &Cli) -> anyhow::Result<CommandOutput> {
    match &cli.command {
        Command::Validate(command) => commands::validate(&cli.global, command).await,
        Command::Config(command) => commands::config(&cli.global, command).await,
        Command::Inventory(args) => commands::inventory(&cli.global, args).await,
        Command::Correlate(args) => commands::correlate(args).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("sslmode=require").unwrap(),
            ("sslmode".to_string(), "require".to_string())
        );
        assert_eq!(
            parse_key_value("options=-c a=b").unwrap(),
            ("options".to_string(), "-c a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_parse_save_command() {
        let cli = Cli::try_parse_from([
            "dbvault",
            "--store",
            "/tmp/v.db",
            "config",
            "save",
            "prod",
            "--kind",
            "database",
            "--db-type",
            "postgresql",
            "--host",
            "db1",
            "--port",
            "5432",
            "--database",
            "erp",
            "--username",
            "odoo_ro",
            "--param",
            "sslmode=require",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.global.verbose, 2);
        assert_eq!(cli.global.store, PathBuf::from("/tmp/v.db"));
        let Command::Config(ConfigCommand::Save(args)) = cli.command else {
            unreachable!("Expected config save");
        };
        assert_eq!(args.name, "prod");
        assert_eq!(ConfigKind::from(args.kind), ConfigKind::DatabaseConnection);
        assert_eq!(args.port, Some(5432));
        assert_eq!(args.params, vec![("sslmode".to_string(), "require".to_string())]);
        assert!(!args.no_secret);
    }

    #[test]
    fn test_secret_is_not_an_argument() {
        let result = Cli::try_parse_from([
            "dbvault", "config", "save", "prod", "--kind", "remote", "--secret", "hunter2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_format_conversion() {
        assert_eq!(LogFormat::from(LogFormatArg::Json), LogFormat::Json);
        assert_eq!(LogFormat::from(LogFormatArg::Text), LogFormat::Text);
    }
}
