//! Application Configuration
//!
//! YAML configuration for the identity store tool, with defaults for every
//! section and environment overrides for the store location.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use std::time::Duration;
use log::{info, warn};

use crate::migration::RetryPolicy;
use crate::store::config::StoreConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Identity store configuration
    pub store: StoreConfig,
    /// Config directory upgrade configuration
    pub migration: MigrationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Config directory upgrade configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationConfig {
    /// Attempts per account before it is reported as failed
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Accounts upgraded at the same time
    pub concurrency: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 20,
            concurrency: 1,
        }
    }
}

impl MigrationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "store_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, use defaults if not found.
    /// Environment overrides are applied in both cases.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = config_path.as_ref();
        let config = if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: AppConfig = serde_yaml::from_str(&content)?;
            info!("Loaded configuration from {}", config_path.display());
            config
        } else {
            warn!("Config file {} not found, using defaults", config_path.display());
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.store = self.store.with_env_overrides();
        self
    }
}
