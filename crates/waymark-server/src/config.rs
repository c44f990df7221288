//! Configuration system for the Waymark daemon.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tracing::warn;
use waymark_cache::PersistencePolicy;
use waymark_crypto::{DkPolicy, KEY_SIZE, MasterKey};

use crate::error::ServerError;

/// Placeholder master key accepted only for development setups.
const DEVELOPMENT_MASTER_KEY: [u8; KEY_SIZE] = [0xc3; KEY_SIZE];

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,
    /// Key and dynamic-key configuration
    pub security: SecurityConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Listen address for listener connections
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Key and dynamic-key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Master key as 32 hex digits
    #[serde(default = "default_master_key")]
    pub master_key: String,
    /// Seconds per low-half dynamic-key evolution
    #[serde(default = "default_dk0_interval")]
    pub dk0_interval: u32,
    /// Seconds per high-half dynamic-key evolution
    #[serde(default = "default_dk1_interval")]
    pub dk1_interval: u32,
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Seconds between write-back cycles
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Seconds of silence before a record is considered stale
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:9999".to_string()
}

fn default_master_key() -> String {
    hex::encode(DEVELOPMENT_MASTER_KEY)
}

fn default_dk0_interval() -> u32 {
    7200
}

fn default_dk1_interval() -> u32 {
    86400
}

fn default_sync_interval() -> u64 {
    5
}

fn default_stale_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            master_key: default_master_key(),
            dk0_interval: default_dk0_interval(),
            dk1_interval: default_dk1_interval(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
            stale_timeout_secs: default_stale_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let contents = fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the listen address as a `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> Result<SocketAddr, ServerError> {
        self.network
            .listen_addr
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid listen address: {e}")))
    }

    /// Decode the configured master key.
    ///
    /// Logs a warning when the development placeholder key is in use.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not exactly 32 hex digits.
    pub fn master_key(&self) -> Result<MasterKey, ServerError> {
        let bytes = hex::decode(&self.security.master_key)
            .map_err(|e| ServerError::Config(format!("master key is not valid hex: {e}")))?;
        let key = MasterKey::from_slice(&bytes)?;
        if bytes == DEVELOPMENT_MASTER_KEY {
            warn!("development master key in use; all derived beacon keys are public knowledge");
        }
        Ok(key)
    }

    /// Dynamic-key evolution intervals
    #[must_use]
    pub fn dk_policy(&self) -> DkPolicy {
        DkPolicy {
            dk0_interval: self.security.dk0_interval,
            dk1_interval: self.security.dk1_interval,
        }
    }

    /// Write-back cadence and staleness cutoff
    #[must_use]
    pub fn persistence_policy(&self) -> PersistencePolicy {
        PersistencePolicy {
            interval: Duration::from_secs(self.persistence.sync_interval_secs),
            stale_after: Duration::from_secs(self.persistence.stale_timeout_secs),
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.parse_listen_addr()?;
        self.master_key()?;

        if self.security.dk0_interval == 0 || self.security.dk1_interval == 0 {
            return Err(ServerError::Config(
                "dynamic-key intervals must be non-zero".to_string(),
            ));
        }
        if self.persistence.sync_interval_secs == 0 {
            return Err(ServerError::Config(
                "sync interval must be non-zero".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ServerError::Config(format!(
                "invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        Ok(())
    }
}
