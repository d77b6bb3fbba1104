//! Client configuration.
//!
//! `ClientConfig` carries endpoint locations, timeouts, the retry policy and
//! upload limits. Every field has a default, so a partial JSON file only
//! overrides what it names. The demo binary reads the file from
//! `~/.config/shaku/config.json` and then applies `SHAKU_*` environment
//! overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ApiError;

/// Application name used for the config directory path
const APP_NAME: &str = "shaku";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "https://api.shaku.tech";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub login_path: String,
    pub measurement_path: String,
    /// Multipart field name carrying the image file
    pub upload_field: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_image_bytes: usize,
    /// Refresh this long before the server-reported expiry
    pub token_refresh_skew_secs: i64,
    /// Keep username/password in memory for silent re-login
    pub remember_login: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: "/auth/login".to_string(),
            measurement_path: "/garment/measurement".to_string(),
            upload_field: "image".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            max_image_bytes: 10 * 1024 * 1024,
            token_refresh_skew_secs: 30,
            remember_login: true,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at another server
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    /// Load from the user config file, falling back to defaults if absent.
    pub fn load() -> Result<Self, ApiError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ApiError::InvalidInput(format!("failed to read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            ApiError::InvalidInput(format!("failed to parse config {}: {e}", path.display()))
        })
    }

    /// Apply `SHAKU_*` overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("SHAKU_BASE_URL") {
            self.base_url = url;
        }
        if let Some(secs) = lookup("SHAKU_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
        if let Some(retries) = lookup("SHAKU_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.max_retries = retries;
        }
        self
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub(crate) fn endpoint_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
