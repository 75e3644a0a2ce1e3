//! Configuration loading and config file resolution
//!
//! Every setting has a built-in default, so an absent config file is never an
//! error. A config file that was asked for explicitly but cannot be read or
//! parsed is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "TANDEM_CONFIG";

/// Tuning for the two-leg synchronization engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Display name of the composite; derived from the leg names when absent
    pub name: Option<String>,

    /// Period of the drift check while both legs play
    pub drift_check_interval_ms: u64,

    /// Leg time divergence above which a sample counts as drifted
    pub drift_threshold_ms: u64,

    /// Consecutive drifted samples required before a corrective seek
    pub drift_confirmations: u32,

    /// Tolerance used when comparing playback rates
    pub rate_tolerance: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            name: None,
            drift_check_interval_ms: 2000,
            drift_threshold_ms: 1000,
            drift_confirmations: 2,
            rate_tolerance: crate::rate::DEFAULT_RATE_TOLERANCE,
        }
    }
}

impl SyncConfig {
    /// Reject values that would make the drift monitor meaningless
    pub fn validate(&self) -> Result<()> {
        if self.drift_check_interval_ms == 0 {
            return Err(Error::Config(
                "drift_check_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.drift_confirmations == 0 {
            return Err(Error::Config(
                "drift_confirmations must be at least 1".to_string(),
            ));
        }
        if !self.rate_tolerance.is_finite() || self.rate_tolerance < 0.0 {
            return Err(Error::Config(format!(
                "rate_tolerance must be a non-negative number, got {}",
                self.rate_tolerance
            )));
        }
        Ok(())
    }

    pub fn drift_check_interval(&self) -> std::time::Duration {
        crate::time::millis_to_duration(self.drift_check_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Config file resolution, highest priority first:
/// 1. Command-line argument
/// 2. `TANDEM_CONFIG` environment variable
/// 3. `<user config dir>/tandem/config.toml` if it exists
///
/// Returns `None` when no file applies; callers then run on defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("tandem").join("config.toml"));
    match user_config {
        Some(path) if path.exists() => Some(path),
        _ => {
            debug!("No config file found, using built-in defaults");
            None
        }
    }
}

/// Read and parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    let value = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(value)
}
