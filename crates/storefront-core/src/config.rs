//! Application configuration management.
//!
//! This module handles loading and saving the user configuration: which
//! API to talk to, where the session is kept, and the local token
//! lifetimes.
//!
//! Configuration is stored at `~/.config/storefront/config.json`. The
//! `STOREFRONT_API_URL` environment variable overrides the API base URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::{ApiClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::auth::{ExpiryPolicy, SessionManager, StorageBackend};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "storefront";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides `api_base_url`
pub const API_URL_ENV: &str = "STOREFRONT_API_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub storage: StorageBackend,
    pub request_timeout_secs: Option<u64>,
    pub access_ttl_hours: Option<i64>,
    pub refresh_ttl_days: Option<i64>,
    /// Email or username used at the last successful login
    pub last_identifier: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
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

    /// Base URL of the API: environment, then config file, then default
    pub fn api_base_url(&self) -> String {
        self.resolve_base_url(std::env::var(API_URL_ENV).ok())
    }

    fn resolve_base_url(&self, from_env: Option<String>) -> String {
        from_env
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Local token lifetimes. Values that are not positive or too large
    /// to date a token fall back to the defaults.
    pub fn expiry_policy(&self) -> ExpiryPolicy {
        let mut policy = ExpiryPolicy::default();
        if let Some(hours) = self.access_ttl_hours {
            policy.access_ttl = ttl_or_default(
                "access_ttl_hours",
                chrono::Duration::try_hours(hours),
                policy.access_ttl,
            );
        }
        if let Some(days) = self.refresh_ttl_days {
            policy.refresh_ttl = ttl_or_default(
                "refresh_ttl_days",
                chrono::Duration::try_days(days),
                policy.refresh_ttl,
            );
        }
        policy
    }

    /// Build a session manager wired to the configured API and store
    pub fn session_manager(&self) -> Result<SessionManager> {
        let api = ApiClient::new(&self.api_base_url(), self.request_timeout())?;
        let store = self.storage.open(&self.cache_dir()?);
        Ok(SessionManager::new(api, store).with_policy(self.expiry_policy()))
    }
}

fn ttl_or_default(
    key: &str,
    ttl: Option<chrono::Duration>,
    default: chrono::Duration,
) -> chrono::Duration {
    match ttl {
        Some(ttl) if ttl > chrono::Duration::zero() && Utc::now().checked_add_signed(ttl).is_some() => ttl,
        _ => {
            warn!(key, default_hours = default.num_hours(), "Token lifetime out of range; using default");
            default
        }
    }
}
