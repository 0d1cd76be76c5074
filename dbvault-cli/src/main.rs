//! Encrypted connection vault and hybrid inventory tool.
//!
//! This binary manages named database connections and remote-instance
//! credentials, validates connection targets, and reconciles what a remote
//! API reports with what the database itself holds.
//!
//! # Security Guarantees
//! - Secrets encrypted at rest under an environment-derived key
//! - Secrets never accepted as command-line arguments
//! - Read-only introspection queries only
//! - Credentials redacted from logs and output

use clap::Parser;
use dbvault_cli::{Cli, execute};
use dbvault_core::logging::init_logging;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.log_format.into(),
    )?;

    let output = execute(&cli).await?;
    if !output.text.is_empty() {
        println!("{}", output.text);
    }

    Ok(if output.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
