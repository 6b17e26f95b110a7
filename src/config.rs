//! Query cache configuration
//!
//! The configuration is read from:
//! 1. `QUERY_CACHE_CONFIG` environment variable (path to TOML file)
//! 2. `./query-cache.toml` in current directory
//! 3. Default configuration
//!
//! ```toml
//! enabled = true
//! overlap_window = "10m"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "QUERY_CACHE_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "query-cache.toml";

/// Default trailing window re-queried on every refresh
pub const DEFAULT_OVERLAP_WINDOW: &str = "10m";

/// Units accepted by [`parse_interval`], in milliseconds
const INTERVAL_UNITS_MS: &[(&str, i64)] = &[
    ("ms", 1),
    ("s", 1_000),
    ("m", 60_000),
    ("h", 3_600_000),
    ("d", 86_400_000),
    ("w", 604_800_000),
    ("y", 31_536_000_000),
];

/// Query cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueryCacheConfig {
    /// Serve now-relative requests incrementally
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Trailing window re-requested on every refresh to absorb ingestion lag
    #[serde(default = "default_overlap_window")]
    pub overlap_window: String,
}

fn default_true() -> bool {
    true
}

fn default_overlap_window() -> String {
    DEFAULT_OVERLAP_WINDOW.to_string()
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overlap_window: default_overlap_window(),
        }
    }
}

impl QueryCacheConfig {
    /// Overlap window as a duration
    pub fn overlap_window(&self) -> Result<Duration> {
        let ms = parse_interval(&self.overlap_window)?;
        Ok(Duration::from_millis(ms as u64))
    }

    /// Overlap window in milliseconds
    pub fn overlap_window_ms(&self) -> Result<i64> {
        parse_interval(&self.overlap_window)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<()> {
        self.overlap_window_ms().map(|_| ())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from file or environment
    ///
    /// Unreadable or invalid files are logged and replaced by defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            match Self::from_file(&path) {
                Ok(config) => {
                    info!(path = %path, "Loaded configuration from file");
                    return config;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to load config file, using defaults");
                }
            }
        }

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            match Self::from_file(DEFAULT_CONFIG_FILE) {
                Ok(config) => {
                    info!("Loaded configuration from {}", DEFAULT_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load {}, using defaults", DEFAULT_CONFIG_FILE);
                }
            }
        }

        info!("Using default configuration");
        Self::default()
    }
}

/// Parse an interval string such as `30s`, `10m` or `1h` into milliseconds
pub fn parse_interval(interval: &str) -> Result<i64> {
    let trimmed = interval.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Configuration(format!("interval '{}' has no unit", interval)))?;
    let (amount, unit) = trimmed.split_at(split);

    let amount: i64 = amount
        .parse()
        .map_err(|_| Error::Configuration(format!("interval '{}' has no amount", interval)))?;

    let unit_ms = INTERVAL_UNITS_MS
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, ms)| *ms)
        .ok_or_else(|| {
            Error::Configuration(format!("interval '{}' has unknown unit '{}'", interval, unit))
        })?;

    amount
        .checked_mul(unit_ms)
        .ok_or_else(|| Error::Configuration(format!("interval '{}' overflows", interval)))
}
