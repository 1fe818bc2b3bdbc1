use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// public registry used when nothing else is configured
pub const DEFAULT_REGISTRY_URL: &str = "https://pkg.quiltdata.com";

/// environment override for the registry url
pub const REGISTRY_URL_ENV: &str = "QUILT_PKG_URL";

/// environment source for the bearer token
pub const TOKEN_ENV: &str = "QUILT_TOKEN";

/// client configuration stored in config.toml
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// registry base url
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// bearer token for the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// worker pool and http settings for push and install
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub upload_workers: usize,
    pub download_workers: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// extra attempts after a connection error or a 5xx response
    pub retries: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_workers: 20,
            download_workers: 20,
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            retries: 3,
        }
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            token: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// load config if the file exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// apply environment overrides
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(REGISTRY_URL_ENV) {
            if !url.is_empty() {
                self.registry_url = url;
            }
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
        self
    }

    /// registry url for a package, taking team registries into account
    pub fn registry_url_for(&self, team: Option<&str>) -> String {
        match team {
            Some(team) => format!("https://{}-registry.team.quiltdata.com", team),
            None => self.registry_url.trim_end_matches('/').to_string(),
        }
    }
}
