//! Configuration management for the URL frontier
//!
//! Loads settings from environment variables or a TOML file and validates
//! them before the frontier is built.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default partition capacity
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frontier cache configuration
    pub frontier: FrontierConfig,

    /// Persistent store configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Frontier cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Capacity of every partition queue
    pub max_size: usize,

    /// How long a refill worker blocks on its job channel per poll
    pub poll_interval_ms: u64,

    /// Upper bound on how long `next_url` waits for one fill cycle
    pub fill_timeout_secs: u64,

    /// Total window `empty_cache` waits for a partition to drain
    pub empty_timeout_secs: u64,

    /// Wait per drain round inside `empty_cache`
    pub empty_poll_ms: u64,
}

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            poll_interval_ms: 1000,
            fill_timeout_secs: 30,
            empty_timeout_secs: 10,
            empty_poll_ms: 1000,
        }
    }
}

impl FrontierConfig {
    /// Set the partition capacity
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the fill wait bound
    pub fn with_fill_timeout(mut self, timeout: Duration) -> Self {
        self.fill_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Worker poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fill wait bound as Duration
    #[must_use]
    pub fn fill_timeout(&self) -> Duration {
        Duration::from_secs(self.fill_timeout_secs)
    }

    /// Drain window as Duration
    #[must_use]
    pub fn empty_timeout(&self) -> Duration {
        Duration::from_secs(self.empty_timeout_secs)
    }

    /// Per-round drain wait as Duration
    #[must_use]
    pub fn empty_poll(&self) -> Duration {
        Duration::from_millis(self.empty_poll_ms)
    }

    /// Validate frontier values
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::config("max_size must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::config("poll_interval_ms must be greater than 0"));
        }
        if self.fill_timeout_secs == 0 {
            return Err(Error::config("fill_timeout_secs must be greater than 0"));
        }
        if self.empty_poll_ms == 0 {
            return Err(Error::config("empty_poll_ms must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/frontier.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = FrontierConfig::default();

        let frontier = FrontierConfig {
            max_size: env_parse("URLFRONTIER_MAX_SIZE").unwrap_or(defaults.max_size),
            poll_interval_ms: env_parse("URLFRONTIER_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval_ms),
            fill_timeout_secs: env_parse("URLFRONTIER_FILL_TIMEOUT")
                .unwrap_or(defaults.fill_timeout_secs),
            empty_timeout_secs: env_parse("URLFRONTIER_EMPTY_TIMEOUT")
                .unwrap_or(defaults.empty_timeout_secs),
            empty_poll_ms: env_parse("URLFRONTIER_EMPTY_POLL_MS").unwrap_or(defaults.empty_poll_ms),
        };

        let sqlite_path = std::env::var("URLFRONTIER_SQLITE_PATH")
            .unwrap_or_else(|_| String::from("data/frontier.db"))
            .into();

        let level = std::env::var("URLFRONTIER_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format =
            std::env::var("URLFRONTIER_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        let config = Self {
            frontier,
            storage: StorageConfig { sqlite_path },
            logging: LoggingConfig { level, format },
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(format!("Failed to read config file: {}", path.display()), e)
        })?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.frontier.validate()?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(format!(
                "unknown log format '{}', expected text or json",
                self.logging.format
            )));
        }

        Ok(())
    }
}
