//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: API base
//! URLs, request timeout, auth endpoint paths, where credentials are kept,
//! and the last used username.
//!
//! Configuration is stored at `~/.config/freightline/config.json`. A few
//! values can be overridden from the environment (see [`Config::apply_env`]).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, FileStore, KeyringStore, MemoryStore};
use crate::session::AuthEndpoints;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "freightline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_API_BASE_URL_V2: &str = "http://localhost:8000/api/v2";

/// HTTP request timeout in seconds. Also bounds the refresh call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Keychain account used when no username has been recorded yet
const DEFAULT_KEYRING_ACCOUNT: &str = "default";

pub const ENV_API_BASE_URL: &str = "FREIGHTLINE_API_BASE_URL";
pub const ENV_API_BASE_URL_V2: &str = "FREIGHTLINE_API_BASE_URL_V2";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "FREIGHTLINE_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub api_base_url_v2: String,
    pub request_timeout_secs: u64,
    pub auth: AuthEndpoints,
    pub credential_storage: StorageKind,
    pub last_username: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_base_url_v2: DEFAULT_API_BASE_URL_V2.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auth: AuthEndpoints::default(),
            credential_storage: StorageKind::default(),
            last_username: None,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
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

    /// Apply `FREIGHTLINE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(ENV_API_BASE_URL_V2).filter(|v| !v.is_empty()) {
            self.api_base_url_v2 = url;
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS).filter(|v| !v.is_empty()) {
            self.request_timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds", ENV_REQUEST_TIMEOUT_SECS))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Open the configured credential store.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.credential_storage {
            StorageKind::Memory => Arc::new(MemoryStore::new()),
            StorageKind::File => Arc::new(FileStore::new(self.cache_dir()?)),
            StorageKind::Keyring => Arc::new(KeyringStore::new(
                self.last_username
                    .as_deref()
                    .unwrap_or(DEFAULT_KEYRING_ACCOUNT),
            )),
        };
        Ok(store)
    }
}
