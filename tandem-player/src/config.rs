//! Configuration for the tandem-sim demo
//!
//! A single TOML file with three optional tables:
//!
//! ```toml
//! [sync]
//! drift_check_interval_ms = 2000
//! drift_threshold_ms = 1000
//!
//! [logging]
//! level = "debug"
//!
//! [sim]
//! row_duration_ms = 30000
//! col_skew = 1.2
//! ```
//!
//! Command-line flags override individual values after loading.

use serde::Deserialize;
use std::path::Path;
use tandem_common::config::{load_toml, resolve_config_path, LoggingConfig, SyncConfig};
use tandem_common::Result;

use crate::sim::SimOptions;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    pub sim: SimSettings,
}

/// Parameters of the two simulated legs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub row_duration_ms: u64,
    pub col_duration_ms: u64,

    /// Clock speed of the row leg relative to real time
    pub row_skew: f64,

    /// Clock speed of the col leg relative to real time
    pub col_skew: f64,

    /// Composite playback rate applied before playing
    pub rate: f64,

    pub time_update_interval_ms: u64,

    /// Period of the snapshot log line
    pub report_interval_ms: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            row_duration_ms: 20_000,
            col_duration_ms: 15_000,
            row_skew: 1.0,
            col_skew: 1.25,
            rate: 1.0,
            time_update_interval_ms: 250,
            report_interval_ms: 1000,
        }
    }
}

impl SimSettings {
    pub fn row_options(&self) -> SimOptions {
        SimOptions {
            duration_ms: self.row_duration_ms,
            skew: self.row_skew,
            time_update_interval_ms: self.time_update_interval_ms,
        }
    }

    pub fn col_options(&self) -> SimOptions {
        SimOptions {
            duration_ms: self.col_duration_ms,
            skew: self.col_skew,
            time_update_interval_ms: self.time_update_interval_ms,
        }
    }
}

impl TomlConfig {
    /// Load from the resolved config file, or defaults when none applies
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) => {
                let config: TomlConfig = load_toml(&path)?;
                config.sync.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }
}
