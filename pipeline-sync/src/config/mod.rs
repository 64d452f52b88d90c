//! Configuration file and persistence
//!
//! `config.toml` lives under the platform config directory
//! (`~/.config/pipeline-sync/` on Linux) unless `--config` points elsewhere.
//! Every key is optional; a missing file means all defaults.

pub mod repository;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resilience::RetryConfig;
use crate::sync::{GroupSchema, SchemaRegistry, SyncSettings};

const APP_DIR: &str = "pipeline-sync";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sheets: SheetsConfig,
    pub sync: SyncConfig,
    /// Schema overrides and additional groups
    pub groups: Vec<GroupSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, defaults to the platform data directory
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    pub api_base: String,
    /// Environment variable holding the OAuth bearer token
    pub access_token_env: String,
    /// Rows above the data range
    pub header_rows: u32,
    /// Rightmost column fetched from Google sheets
    pub last_column: String,
    pub timeout_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://sheets.googleapis.com/v4".to_string(),
            access_token_env: "GOOGLE_SHEETS_TOKEN".to_string(),
            header_rows: 1,
            last_column: "Z".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pause between sources in `sync all`
    pub source_delay_ms: u64,
    pub lease_ttl_secs: u64,
    pub retry: RetrySettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_delay_ms: 2000,
            lease_ttl_secs: 900,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            jitter: settings.jitter,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    log::debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML")
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("pipeline.db")
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            header_rows: self.sheets.header_rows,
            lease_ttl: Duration::from_secs(self.sync.lease_ttl_secs),
            source_delay: Duration::from_millis(self.sync.source_delay_ms),
            retry: RetryConfig::from(&self.sync.retry),
        }
    }

    pub fn schema_registry(&self) -> SchemaRegistry {
        SchemaRegistry::with_overrides(self.groups.clone())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}
