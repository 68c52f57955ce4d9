use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::process_monitor::{MetricFamily, RetentionPolicy, MIN_SAMPLING_INTERVAL};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sampling_interval_ms: u64,
    pub max_age_secs: u64,
    pub max_row_count: u64,
    pub metrics_enabled: BTreeSet<MetricFamily>,
    /// Sample store file; defaults to the platform data directory
    pub data_path: Option<PathBuf>,
    /// Upper bound for one process table read
    pub read_timeout_ms: u64,
    /// Upper bound for waiting on a locked store file
    pub store_busy_timeout_ms: u64,
    /// How long a silent process stays in live rankings
    pub top_staleness_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 2_000,
            max_age_secs: 24 * 60 * 60,
            max_row_count: 1_000_000,
            metrics_enabled: [MetricFamily::Cpu, MetricFamily::Memory, MetricFamily::Disk]
                .into_iter()
                .collect(),
            data_path: None,
            read_timeout_ms: 1_000,
            store_busy_timeout_ms: 2_000,
            top_staleness_ms: None,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when no
    /// config file exists yet
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_path()?;

        if !config_path.exists() {
            return Ok(Config::default());
        }
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        // An empty file means "all defaults"
        let config = if data.trim().is_empty() {
            Config::default()
        } else {
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let data = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, data).map_err(write_err)?;

        Ok(())
    }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;

        Ok(config_dir.join("procwatch").join("config.json"))
    }

    /// Configured store path, or `<data dir>/procwatch/samples.db`
    pub fn data_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.data_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_local_dir().ok_or(ConfigError::NoDirectory("data"))?;

        Ok(data_dir.join("procwatch").join("samples.db"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_interval() < MIN_SAMPLING_INTERVAL {
            return Err(ConfigError::invalid(format!(
                "sampling_interval_ms must be at least {}",
                MIN_SAMPLING_INTERVAL.as_millis()
            )));
        }
        if self.max_row_count == 0 || self.max_row_count > i64::MAX as u64 {
            return Err(ConfigError::invalid(
                "max_row_count must be between 1 and 9223372036854775807",
            ));
        }
        if self.max_age_secs == 0 {
            return Err(ConfigError::invalid("max_age_secs must be at least 1"));
        }
        if self.read_timeout_ms == 0 || self.store_busy_timeout_ms == 0 {
            return Err(ConfigError::invalid("timeouts must be positive"));
        }
        if self.metrics_enabled.is_empty() {
            return Err(ConfigError::invalid("metrics_enabled must not be empty"));
        }
        Ok(())
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn store_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store_busy_timeout_ms)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(Duration::from_secs(self.max_age_secs), self.max_row_count)
    }
}
