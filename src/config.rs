//! Configuration management for the stepwise query engine
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Query engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Query engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Record per-operator telemetry for query analysis
    #[serde(default)]
    pub enable_analysis: bool,

    /// Per-query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Selector lookback window in milliseconds
    #[serde(default = "default_lookback_delta_ms")]
    pub lookback_delta_ms: i64,

    /// Evaluation steps produced per operator batch
    #[serde(default = "default_steps_batch")]
    pub steps_batch: usize,

    /// Shards per vector selector
    #[serde(default = "default_decoding_concurrency")]
    pub decoding_concurrency: usize,

    /// Batches buffered ahead by concurrent operators
    #[serde(default = "default_concurrent_buffer_size")]
    pub concurrent_buffer_size: usize,

    /// Buffers of each kind a query's pool keeps for reuse
    #[serde(default = "default_pool_max_retained")]
    pub pool_max_retained: usize,
}

// Default value functions
fn default_timeout_ms() -> u64 { 120_000 }
fn default_lookback_delta_ms() -> i64 { 300_000 }
fn default_steps_batch() -> usize { 10 }
fn default_decoding_concurrency() -> usize { (num_cpus::get() / 2).max(1) }
fn default_concurrent_buffer_size() -> usize { 2 }
fn default_pool_max_retained() -> usize { 1024 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_analysis: false,
            timeout_ms: default_timeout_ms(),
            lookback_delta_ms: default_lookback_delta_ms(),
            steps_batch: default_steps_batch(),
            decoding_concurrency: default_decoding_concurrency(),
            concurrent_buffer_size: default_concurrent_buffer_size(),
            pool_max_retained: default_pool_max_retained(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparsable environment override");
            None
        },
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents).map_err(|e| {
            Error::Configuration(format!("failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `STEPWISE_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        let engine = &mut self.engine;
        if let Some(v) = env_parse("STEPWISE_ENABLE_ANALYSIS") {
            engine.enable_analysis = v;
        }
        if let Some(v) = env_parse("STEPWISE_TIMEOUT_MS") {
            engine.timeout_ms = v;
        }
        if let Some(v) = env_parse("STEPWISE_LOOKBACK_DELTA_MS") {
            engine.lookback_delta_ms = v;
        }
        if let Some(v) = env_parse("STEPWISE_STEPS_BATCH") {
            engine.steps_batch = v;
        }
        if let Some(v) = env_parse("STEPWISE_DECODING_CONCURRENCY") {
            engine.decoding_concurrency = v;
        }
        if let Some(v) = env_parse("STEPWISE_CONCURRENT_BUFFER_SIZE") {
            engine.concurrent_buffer_size = v;
        }
        if let Some(v) = env_parse("STEPWISE_POOL_MAX_RETAINED") {
            engine.pool_max_retained = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.timeout_ms == 0 {
            return Err(Error::Configuration("timeout_ms must be > 0".to_string()));
        }
        if engine.lookback_delta_ms <= 0 {
            return Err(Error::Configuration("lookback_delta_ms must be > 0".to_string()));
        }
        if engine.steps_batch == 0 {
            return Err(Error::Configuration("steps_batch must be > 0".to_string()));
        }
        if engine.decoding_concurrency == 0 {
            return Err(Error::Configuration("decoding_concurrency must be > 0".to_string()));
        }
        if engine.decoding_concurrency > 1024 {
            return Err(Error::Configuration("decoding_concurrency cannot exceed 1024".to_string()));
        }
        if engine.concurrent_buffer_size == 0 {
            return Err(Error::Configuration("concurrent_buffer_size must be > 0".to_string()));
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.timeout_ms, 120_000);
        assert_eq!(config.engine.concurrent_buffer_size, 2);
        assert!(config.engine.decoding_concurrency >= 1);
        assert!(!config.engine.enable_analysis);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.engine.steps_batch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str("[engine]\nenable_analysis = true\nsteps_batch = 5\n").unwrap();
        assert!(config.engine.enable_analysis);
        assert_eq!(config.engine.steps_batch, 5);
        assert_eq!(config.engine.lookback_delta_ms, 300_000);

        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[engine]\nsteps_batch = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepwise.toml");
        let mut config = Config::default();
        config.engine.timeout_ms = 5_000;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/stepwise.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("STEPWISE_STEPS_BATCH", "7");
        std::env::set_var("STEPWISE_TIMEOUT_MS", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.engine.steps_batch, 7);
        assert_eq!(config.engine.timeout_ms, 120_000);
        std::env::remove_var("STEPWISE_STEPS_BATCH");
        std::env::remove_var("STEPWISE_TIMEOUT_MS");
    }
}
