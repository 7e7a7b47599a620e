//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the backend URL, auth endpoint paths, timeouts, UI language and where
//! tokens are kept. Values can be overridden from the environment.
//!
//! Configuration is stored at `~/.config/qalam/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::locale::Locale;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "qalam";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "https://api.qalam.app";
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
const DEFAULT_AUTH_ENTRY_PATH: &str = "/auth";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on the refresh call itself.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

/// How long a queued request waits for someone else's refresh.
const DEFAULT_REFRESH_WAIT_SECS: u64 = 30;

/// Environment overrides
const ENV_API_URL: &str = "QALAM_API_URL";
const ENV_LOCALE: &str = "QALAM_LOCALE";
const ENV_TOKEN_BACKEND: &str = "QALAM_TOKEN_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub refresh_path: String,
    pub auth_entry_path: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub refresh_wait_secs: u64,
    pub locale: Locale,
    pub token_backend: TokenBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            auth_entry_path: DEFAULT_AUTH_ENTRY_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            refresh_wait_secs: DEFAULT_REFRESH_WAIT_SECS,
            locale: Locale::default(),
            token_backend: TokenBackend::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (the process environment in practice).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(value) = lookup(ENV_LOCALE) {
            match value.parse() {
                Ok(locale) => self.locale = locale,
                Err(e) => warn!(error = %e, "Ignoring {}", ENV_LOCALE),
            }
        }
        if let Some(value) = lookup(ENV_TOKEN_BACKEND) {
            match value.trim().to_ascii_lowercase().as_str() {
                "file" => self.token_backend = TokenBackend::File,
                "keyring" => self.token_backend = TokenBackend::Keyring,
                other => warn!(value = other, "Ignoring unknown {}", ENV_TOKEN_BACKEND),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_base_url.clone(),
            refresh_path: self.refresh_path.clone(),
            auth_entry_path: self.auth_entry_path.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            refresh_timeout: Duration::from_secs(self.refresh_timeout_secs),
            refresh_wait: Duration::from_secs(self.refresh_wait_secs),
        }
    }
}

/// Settings the API client needs at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub refresh_path: String,
    pub auth_entry_path: String,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
    pub refresh_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Config::default().client_config()
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Join a relative API path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
