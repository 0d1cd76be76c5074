//! Secret input for the command line.
//!
//! # Security
//! - Secrets never come from command-line arguments (visible in `ps`)
//! - `DBVAULT_SECRET` wins over the interactive prompt
//! - Values are held in `Zeroizing` buffers

use anyhow::{Context, bail};
use zeroize::Zeroizing;

/// Environment variable holding a secret for non-interactive use.
pub const SECRET_ENV: &str = "DBVAULT_SECRET";

/// Reads a secret from `DBVAULT_SECRET`, else prompts without echo.
///
/// # Errors
/// Returns an error when no terminal is available for the prompt or the
/// secret is empty.
pub fn read_secret(prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    if let Some(secret) = std::env::var(SECRET_ENV)
        .ok()
        .filter(|value| !value.is_empty())
    {
        tracing::debug!("Secret read from {}", SECRET_ENV);
        return Ok(Zeroizing::new(secret));
    }

    let secret = Zeroizing::new(rpassword::prompt_password(prompt).with_context(|| {
        format!(
            "Failed to read secret from the terminal; set {} for non-interactive use",
            SECRET_ENV
        )
    })?);

    if secret.is_empty() {
        bail!("Secret cannot be empty");
    }
    Ok(secret)
}
