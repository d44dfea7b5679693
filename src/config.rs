//! Configuration management for Tollgate.
//!
//! Limits are described in YAML. Engine knobs can be overridden through
//! `TOLLGATE_`-prefixed environment variables, e.g.
//! `TOLLGATE_ENGINE__PURGE_HIT_SIZE=500`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{
    StoreSettings, DEFAULT_INITIAL_CAPACITY, DEFAULT_PURGE_HIT_DURATION, DEFAULT_PURGE_HIT_SIZE,
};

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Window store configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Limits, evaluated in the listed order
    #[serde(default)]
    pub limits: Vec<LimitRuleConfig>,

    /// Requests that bypass every limit
    #[serde(default)]
    pub exclude: ExcludeConfig,
}

/// Window store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Entry count before a purge is considered
    #[serde(default = "default_purge_hit_size")]
    pub purge_hit_size: usize,

    /// Minimum seconds between two purges
    #[serde(default = "default_purge_hit_duration_secs")]
    pub purge_hit_duration_secs: u64,

    /// Initial capacity of the record store
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            purge_hit_size: default_purge_hit_size(),
            purge_hit_duration_secs: default_purge_hit_duration_secs(),
            initial_capacity: default_initial_capacity(),
        }
    }
}

fn default_purge_hit_size() -> usize {
    DEFAULT_PURGE_HIT_SIZE
}

fn default_purge_hit_duration_secs() -> u64 {
    DEFAULT_PURGE_HIT_DURATION.as_secs()
}

fn default_initial_capacity() -> usize {
    DEFAULT_INITIAL_CAPACITY
}

impl EngineConfig {
    /// Convert to the store's settings.
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            purge_hit_size: self.purge_hit_size,
            purge_hit_duration: Duration::from_secs(self.purge_hit_duration_secs),
            initial_capacity: self.initial_capacity,
        }
    }
}

/// One limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRuleConfig {
    /// Optional name used in logs
    #[serde(default)]
    pub name: Option<String>,
    /// Requests allowed per window
    pub requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Request attribute used as the key
    pub key: KeySource,
}

impl LimitRuleConfig {
    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Request attribute a limit is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Client address or host name
    Client,
    /// Request path
    Path,
    /// API token; requests without one are not limited by this rule
    Token,
}

/// Exclusion rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeConfig {
    /// Requests whose path ends with any of these are never limited
    #[serde(default)]
    pub path_suffixes: Vec<String>,
}

impl ExcludeConfig {
    /// Whether `path` is excluded.
    pub fn matches(&self, path: &str) -> bool {
        self.path_suffixes
            .iter()
            .any(|suffix| path.ends_with(suffix.as_str()))
    }
}

impl TollgateConfig {
    /// Load configuration from a file, applying environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let config: TollgateConfig = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix("TOLLGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| TollgateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would otherwise only fail at registration time.
    pub fn validate(&self) -> Result<()> {
        for (index, rule) in self.limits.iter().enumerate() {
            let label = rule.name.clone().unwrap_or_else(|| format!("#{}", index));
            if rule.requests == 0 {
                return Err(TollgateError::Config(format!(
                    "limit {}: requests must be greater than 0",
                    label
                )));
            }
            if rule.window_secs == 0 {
                return Err(TollgateError::Config(format!(
                    "limit {}: window_secs must be greater than 0",
                    label
                )));
            }
        }
        Ok(())
    }
}
