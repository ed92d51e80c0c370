//! Configuration management
//!
//! Handles loading and saving transfer settings from a TOML file at
//! `$FERRY_CONFIG_DIR/config.toml` or the platform config directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::{CopyCost, TransferAction};
use crate::io::DEFAULT_CHUNK_SIZE;

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "FERRY_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferConfig,
    pub retry: RetryConfig,
}

/// Transfer tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Aggregate bytes per second, 0 for unlimited
    pub bandwidth_limit: u64,
    pub chunk_size: usize,
    /// Files moved in parallel
    pub concurrency: usize,
    pub copy_cost: CopyCost,
    pub upload_action: TransferAction,
    pub download_action: TransferAction,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            bandwidth_limit: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            copy_cost: CopyCost::default(),
            upload_action: TransferAction::default(),
            download_action: TransferAction::default(),
        }
    }
}

impl TransferConfig {
    /// Worker count, never zero
    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Retry policy for transient failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// Loads and saves [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for the default location
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::config("Could not determine config directory"))?
                .join("ferry"),
        };
        Ok(Self::with_path(dir.join(CONFIG_FILE)))
    }

    /// Manager for an explicit file (useful for testing)
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }

    /// Load the configuration, defaults when the file does not exist
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "No config file, using defaults");
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(&self.config_path)?;
        toml::from_str(&content).map_err(|e| {
            Error::config(format!("Invalid {}: {e}", self.config_path.display())).with_cause(e)
        })
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(config).map_err(|e| {
            Error::config(format!("Failed to serialize config: {e}")).with_cause(e)
        })?;
        std::fs::write(&self.config_path, content)?;
        tracing::debug!(path = %self.config_path.display(), "Saved config");
        Ok(())
    }
}
