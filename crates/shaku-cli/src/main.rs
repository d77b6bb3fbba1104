//! shaku - measure a garment photo with the shaku API.
//!
//! Reads client credentials and the account from `SHAKU_*` environment
//! variables (a `.env` file is honored), logs in, uploads the image given as
//! the first argument and prints the measurements as JSON.

mod keychain;

use std::io;

use anyhow::{Context, Result};
use shaku_core::{ApiClient, ClientConfig, Credentials};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keychain::Keychain;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set (environment or .env)"))
}

/// Password from the environment, then the keychain, then a prompt.
/// The flag reports whether it was typed in and should be remembered.
fn resolve_password(username: &str) -> Result<(String, bool)> {
    if let Ok(password) = std::env::var("SHAKU_PASSWORD") {
        return Ok((password, false));
    }
    if let Some(password) = Keychain::password(username) {
        return Ok((password, false));
    }
    let password = rpassword::prompt_password(format!("Password for {username}: "))?;
    Ok((password, true))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let image = std::env::args()
        .nth(1)
        .context("usage: shaku <garment_image>")?;

    let config = ClientConfig::load()
        .context("Failed to load config")?
        .apply_env();
    let credentials = Credentials::new(
        required_env("SHAKU_CLIENT_ID")?,
        required_env("SHAKU_CLIENT_SECRET")?,
    );
    let username = required_env("SHAKU_USERNAME")?;
    let (password, typed) = resolve_password(&username)?;

    let client = ApiClient::with_config(credentials, config)?;
    client
        .login(&username, &password)
        .await
        .context("Login failed")?;

    if typed {
        if let Err(e) = Keychain::store(&username, &password) {
            warn!(error = %e, "Failed to store password");
        }
    }

    let result = client
        .garment_measurement(image.as_str())
        .await
        .with_context(|| format!("Failed to measure {image}"))?;

    info!(parts = result.measurements.len(), "Measurement complete");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
