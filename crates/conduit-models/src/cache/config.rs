//! Configuration for response caching.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration for the response cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Whether response caching is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds a cached response stays valid (default: 3600 = 1 hour).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of responses kept in memory (default: 10000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// How often the expiry sweep runs in seconds (default: 300 = 5 minutes).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Errors that can occur during cache configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheConfigError {
    /// Invalid TTL (must be > 0).
    #[error("Invalid cache TTL: must be greater than 0")]
    InvalidTtl,

    /// Invalid max entries (must be > 0).
    #[error("Invalid max cache entries: must be greater than 0")]
    InvalidMaxEntries,

    /// Invalid sweep interval (must be > 0).
    #[error("Invalid sweep interval: must be greater than 0")]
    InvalidSweepInterval,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Validate the cache configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), CacheConfigError> {
        if self.ttl_secs == 0 {
            return Err(CacheConfigError::InvalidTtl);
        }

        if self.max_entries == 0 {
            return Err(CacheConfigError::InvalidMaxEntries);
        }

        if self.sweep_interval_secs == 0 {
            return Err(CacheConfigError::InvalidSweepInterval);
        }

        Ok(())
    }

    /// Get the TTL as a Duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Get the sweep interval as a Duration.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl_secs, 3600);
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.sweep_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cache_config_validation_errors() {
        let config = CacheConfig { ttl_secs: 0, ..CacheConfig::default() };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidTtl));

        let config = CacheConfig { max_entries: 0, ..CacheConfig::default() };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidMaxEntries));

        let config = CacheConfig { sweep_interval_secs: 0, ..CacheConfig::default() };
        assert_eq!(config.validate(), Err(CacheConfigError::InvalidSweepInterval));
    }

    #[test]
    fn test_cache_config_from_toml_uses_defaults() {
        let config: CacheConfig = toml::from_str("ttl_secs = 60").unwrap();
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert_eq!(config.max_entries, 10_000);
        assert!(config.enabled);
    }
}
