//! Configuration module for Conduit Core.
//!
//! Settings come from `conduit.toml`, then `CONDUIT_*` environment
//! variables, then command-line flags applied by the caller. Every section
//! has defaults, so an empty file is valid.
//!
//! ```toml
//! registry = "models.yaml"
//!
//! [router]
//! request_timeout_secs = 60
//!
//! [cache]
//! ttl_secs = 3600
//!
//! [breaker]
//! failure_threshold = 5
//! cooldown_ms = 60000
//!
//! [workflow]
//! max_iterations = 25
//!
//! [[backends]]
//! id = "openrouter"
//! kind = "openai_compatible"
//! base_url = "https://openrouter.ai/api/v1"
//! api_key_env = "OPENROUTER_API_KEY"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use conduit_models::{BackendConfig, BackendKind, CacheConfig, FactoryError};
use conduit_orchestrator::{BreakerConfig, ConfigError, RouterConfig, RoutingConfig, RoutingConfigLoader};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::workflow::DEFAULT_MAX_ITERATIONS;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CONDUIT_";

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("Failed to read settings file '{path}': {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML.
    #[error("Failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Offending value.
        value: String,
    },

    /// A routing section was rejected.
    #[error(transparent)]
    Routing(#[from] ConfigError),

    /// A backend entry was rejected.
    #[error("Invalid backend '{id}': {source}")]
    Backend {
        /// Backend identifier.
        id: String,
        /// Underlying error.
        #[source]
        source: FactoryError,
    },

    /// Any other validation failure.
    #[error("Invalid settings: {0}")]
    Validation(String),
}

/// Workflow engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Transition bound for definitions that do not set one (default: 25).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { max_iterations: default_max_iterations() }
    }
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Backend identifier referenced by the model registry.
    pub id: String,
    /// Backend kind (`echo`, `mock`, `openai_compatible`, `claude`, or an alias).
    pub kind: String,
    /// Endpoint base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model used when the request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// HTTP timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl BackendSettings {
    /// Parsed backend kind.
    ///
    /// # Errors
    /// Returns `SettingsError::Backend` for an unknown kind.
    pub fn backend_kind(&self) -> Result<BackendKind, SettingsError> {
        BackendKind::from_str(&self.kind).map_err(|source| SettingsError::Backend { id: self.id.clone(), source })
    }

    /// Resolves the adapter configuration, reading the API key through `env`.
    ///
    /// # Errors
    /// Returns `SettingsError::Backend` for an unknown kind.
    pub fn to_backend_config(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<BackendConfig, SettingsError> {
        let mut config = BackendConfig::new(self.id.clone(), self.backend_kind()?);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        if let Some(key) = self.api_key_env.as_deref().and_then(&env) {
            config = config.with_api_key(key);
        }
        if let Some(model) = &self.default_model {
            config = config.with_default_model(model.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

/// Root settings for Conduit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Path of the model registry YAML.
    #[serde(default)]
    pub registry: Option<PathBuf>,
    /// Router settings.
    #[serde(default)]
    pub router: RouterConfig,
    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Circuit breaker settings.
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Workflow engine settings.
    #[serde(default)]
    pub workflow: WorkflowSettings,
    /// Backend adapters.
    #[serde(default)]
    pub backends: Vec<BackendSettings>,
}

impl Settings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings: the file (if any), then environment overrides, then
    /// validation.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an override
    /// is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides_from(std::env::vars())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a TOML file without applying overrides.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.display().to_string(), source })?;
        let mut settings = Self::parse(&content)?;
        if let (Some(registry), Some(dir)) = (&settings.registry, path.parent()) {
            if registry.is_relative() {
                settings.registry = Some(dir.join(registry));
            }
        }
        Ok(settings)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text is not valid TOML for these settings.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `CONDUIT_*` overrides from `vars`. Unrelated variables are
    /// ignored.
    ///
    /// # Errors
    /// Returns `SettingsError::InvalidEnv` for a value that does not parse.
    pub fn apply_env_overrides_from<I>(&mut self, vars: I) -> Result<(), SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in vars {
            let Some(key) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "REGISTRY" => self.registry = Some(PathBuf::from(&value)),
                "REQUEST_TIMEOUT_SECS" => self.router.request_timeout_secs = Some(parse_env(&var, &value)?),
                "CACHE_ENABLED" => self.cache.enabled = parse_env(&var, &value)?,
                "CACHE_TTL_SECS" => self.cache.ttl_secs = parse_env(&var, &value)?,
                "CACHE_MAX_ENTRIES" => self.cache.max_entries = parse_env(&var, &value)?,
                "BREAKER_FAILURE_THRESHOLD" => self.breaker.failure_threshold = parse_env(&var, &value)?,
                "BREAKER_COOLDOWN_MS" => self.breaker.cooldown_ms = parse_env(&var, &value)?,
                "BREAKER_MAX_COOLDOWN_MS" => self.breaker.max_cooldown_ms = parse_env(&var, &value)?,
                "BREAKER_JITTER" => self.breaker.jitter = parse_env(&var, &value)?,
                "MAX_ITERATIONS" => self.workflow.max_iterations = parse_env(&var, &value)?,
                _ => continue,
            }
            debug!(var = %var, "Applied environment override");
        }
        Ok(())
    }

    /// The routing sections as one [`RoutingConfig`].
    #[must_use]
    pub fn routing_config(&self) -> RoutingConfig {
        RoutingConfig { router: self.router.clone(), cache: self.cache.clone(), breaker: self.breaker.clone() }
    }

    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first invalid section.
    pub fn validate(&self) -> Result<(), SettingsError> {
        RoutingConfigLoader::validate(&self.routing_config())?;
        if self.workflow.max_iterations == 0 {
            return Err(SettingsError::Validation("workflow.max_iterations must be greater than 0".to_string()));
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                return Err(SettingsError::Validation(format!("duplicate backend id '{}'", backend.id)));
            }
            backend.backend_kind()?;
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(var: &str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidEnv { var: var.to_string(), value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::new();
        assert_eq!(settings.workflow.max_iterations, 25);
        assert_eq!(settings.breaker.failure_threshold, 5);
        assert!(settings.cache.enabled);
        assert!(settings.backends.is_empty());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_parse_full() {
        let settings = Settings::parse(
            r#"
registry = "models.yaml"

[router]
request_timeout_secs = 20

[breaker]
failure_threshold = 3

[workflow]
max_iterations = 7

[[backends]]
id = "local"
kind = "ollama"
base_url = "http://localhost:11434/v1"
default_model = "llama3"

[[backends]]
id = "anthropic"
kind = "claude"
api_key_env = "TEST_ANTHROPIC_KEY"
timeout_secs = 30
"#,
        )
        .unwrap();

        assert_eq!(settings.registry, Some(PathBuf::from("models.yaml")));
        assert_eq!(settings.router.request_timeout_secs, Some(20));
        assert_eq!(settings.breaker.failure_threshold, 3);
        assert_eq!(settings.breaker.cooldown_ms, 60_000);
        assert_eq!(settings.workflow.max_iterations, 7);
        assert_eq!(settings.backends.len(), 2);
        assert_eq!(settings.backends[0].backend_kind().unwrap(), BackendKind::OpenAiCompatible);
        assert!(settings.validate().is_ok());

        let anthropic = settings.backends[1]
            .to_backend_config(|var| (var == "TEST_ANTHROPIC_KEY").then(|| "sk-test".to_string()))
            .unwrap();
        assert_eq!(anthropic.kind, BackendKind::Claude);
        assert_eq!(anthropic.api_key.as_deref(), Some("sk-test"));
        assert_eq!(anthropic.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::new();
        settings
            .apply_env_overrides_from(vars(&[
                ("CONDUIT_CACHE_TTL_SECS", "90"),
                ("CONDUIT_BREAKER_FAILURE_THRESHOLD", "2"),
                ("CONDUIT_REQUEST_TIMEOUT_SECS", "15"),
                ("CONDUIT_MAX_ITERATIONS", "4"),
                ("CONDUIT_UNKNOWN", "ignored"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(settings.cache.ttl_secs, 90);
        assert_eq!(settings.breaker.failure_threshold, 2);
        assert_eq!(settings.router.request_timeout_secs, Some(15));
        assert_eq!(settings.workflow.max_iterations, 4);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut settings = Settings::new();
        let err = settings.apply_env_overrides_from(vars(&[("CONDUIT_CACHE_TTL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidEnv { ref var, .. } if var == "CONDUIT_CACHE_TTL_SECS"));
    }

    #[test]
    fn test_validation_failures() {
        let settings = Settings::parse("[workflow]\nmax_iterations = 0\n").unwrap();
        assert!(matches!(settings.validate(), Err(SettingsError::Validation(_))));

        let settings = Settings::parse("[breaker]\ncooldown_ms = 0\n").unwrap();
        assert!(matches!(settings.validate(), Err(SettingsError::Routing(_))));

        let settings = Settings::parse("[[backends]]\nid = \"x\"\nkind = \"carrier-pigeon\"\n").unwrap();
        assert!(matches!(settings.validate(), Err(SettingsError::Backend { .. })));

        let settings =
            Settings::parse("[[backends]]\nid = \"x\"\nkind = \"echo\"\n\n[[backends]]\nid = \"x\"\nkind = \"mock\"\n")
                .unwrap();
        assert!(matches!(settings.validate(), Err(SettingsError::Validation(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_registry_path_resolved_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.toml");
        std::fs::write(&path, "registry = \"models.yaml\"\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.registry, Some(dir.path().join("models.yaml")));
    }

    #[test]
    fn test_load_missing_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nenabled = false").unwrap();
        let settings = Settings::from_file(file.path()).unwrap();
        assert!(!settings.cache.enabled);

        let err = Settings::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}
