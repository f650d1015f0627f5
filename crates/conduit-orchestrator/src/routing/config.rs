//! TOML configuration support for the routing layer.

use std::path::Path;
use std::time::Duration;

use conduit_models::{CacheConfig, CacheConfigError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading the file.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Cache section rejected.
    #[error("Invalid cache configuration: {0}")]
    Cache(#[from] CacheConfigError),

    /// Configuration validation error.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Circuit breaker settings, shared by every backend's breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker (default: 5).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Milliseconds to stay open after the first trip (default: 60000).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Upper bound for the cooldown after repeated failed trials (default: 300000).
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,

    /// Random spread applied to each cooldown, as a fraction (default: 0.0).
    #[serde(default)]
    pub jitter: f64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
            jitter: 0.0,
        }
    }
}

impl BreakerConfig {
    /// Creates settings with the given threshold and cooldown, no backoff
    /// headroom and no jitter.
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        let cooldown_ms = cooldown.as_millis() as u64;
        Self { failure_threshold, cooldown_ms, max_cooldown_ms: cooldown_ms, jitter: 0.0 }
    }

    /// Sets the cooldown ceiling for repeated failed trials.
    #[must_use]
    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown_ms = max_cooldown.as_millis() as u64;
        self
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Cooldown after the first trip.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Cooldown ceiling; never below the base cooldown.
    #[must_use]
    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms.max(self.cooldown_ms))
    }

    /// Validate the breaker settings.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for a zero threshold, a zero
    /// cooldown, or a jitter outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.cooldown_ms == 0 {
            return Err(ConfigError::Validation(
                "breaker.cooldown_ms must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::Validation(format!(
                "breaker.jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

/// Router settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Upper bound on a single backend call in seconds; a timeout counts as
    /// a breaker failure. Unset means the adapter's own timeout applies.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl RouterConfig {
    /// Request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Routing configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Router settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
}

/// Configuration loader for routing settings.
pub struct RoutingConfigLoader;

impl RoutingConfigLoader {
    /// Loads routing configuration from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<RoutingConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses routing configuration from TOML text.
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or validated.
    pub fn parse(content: &str) -> Result<RoutingConfig> {
        let config: RoutingConfig = toml::from_str(content)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validates routing configuration.
    ///
    /// # Errors
    /// Returns error if any section is invalid.
    pub fn validate(config: &RoutingConfig) -> Result<()> {
        config.cache.validate()?;
        config.breaker.validate()?;
        if config.router.request_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "router.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
