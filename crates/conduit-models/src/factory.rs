//! Constructor table for backend adapters.
//!
//! Backends are created from explicit configuration through a table of
//! constructors keyed by [`BackendKind`]. The table is populated once at
//! startup (usually via [`ModelFactory::with_builtin`]) and injected into the
//! composition root; nothing here scans the environment.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use conduit_abstraction::{Model, ModelError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{ClaudeModel, EchoModel, MockModel, UniversalModel};

/// Backend kind enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Returns the prompt unchanged.
    Echo,
    /// Canned responses for testing.
    Mock,
    /// Any OpenAI Chat Completions compatible server.
    OpenAiCompatible,
    /// Anthropic Messages API.
    Claude,
}

impl BackendKind {
    /// Canonical configuration name for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Mock => "mock",
            Self::OpenAiCompatible => "openai_compatible",
            Self::Claude => "claude",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "mock" => Ok(Self::Mock),
            "openai" | "openai_compatible" | "openai-compatible" | "universal" | "openrouter"
            | "ollama" | "local" => Ok(Self::OpenAiCompatible),
            "claude" | "anthropic" => Ok(Self::Claude),
            _ => Err(FactoryError::UnknownKind(s.to_string())),
        }
    }
}

/// Errors raised while building adapters.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The kind string did not match any known backend kind.
    #[error("Unrecognized backend kind: {0}")]
    UnknownKind(String),

    /// No constructor was registered for the kind.
    #[error("No constructor registered for backend kind '{0}'")]
    NoConstructor(BackendKind),

    /// A required configuration field was missing.
    #[error("Backend '{backend}' requires '{field}'")]
    MissingField {
        /// Backend identifier.
        backend: String,
        /// Missing field name.
        field: &'static str,
    },

    /// The adapter itself refused to start.
    #[error("Backend '{backend}' failed to initialize: {source}")]
    Adapter {
        /// Backend identifier.
        backend: String,
        /// Underlying adapter error.
        #[source]
        source: ModelError,
    },
}

/// Resolved configuration for one backend.
///
/// Credentials are already resolved here; reading them from the environment
/// is the settings layer's job.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend identifier (e.g., "openai", "anthropic", "local").
    pub id: String,
    /// Which adapter to build.
    pub kind: BackendKind,
    /// API root, required for OpenAI-compatible backends.
    pub base_url: Option<String>,
    /// Optional API key.
    pub api_key: Option<String>,
    /// Model used when a call does not name one.
    pub default_model: Option<String>,
    /// HTTP timeout for the adapter's client.
    pub timeout: Option<Duration>,
}

impl BackendConfig {
    /// Creates a new `BackendConfig` with the given identifier and kind.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: None,
            api_key: None,
            default_model: None,
            timeout: None,
        }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the default provider-side model.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A function that builds an adapter from backend configuration.
pub type ModelConstructor = fn(&BackendConfig) -> Result<Arc<dyn Model>, FactoryError>;

/// Table of adapter constructors keyed by backend kind.
#[derive(Clone, Default)]
pub struct ModelFactory {
    constructors: HashMap<BackendKind, ModelConstructor>,
}

impl fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ModelFactory").field("kinds", &kinds).finish()
    }
}

impl ModelFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with every built-in adapter registered.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self::new()
            .register(BackendKind::Echo, build_echo)
            .register(BackendKind::Mock, build_mock)
            .register(BackendKind::OpenAiCompatible, build_openai_compatible)
            .register(BackendKind::Claude, build_claude)
    }

    /// Registers (or replaces) the constructor for a kind.
    #[must_use]
    pub fn register(mut self, kind: BackendKind, constructor: ModelConstructor) -> Self {
        self.constructors.insert(kind, constructor);
        self
    }

    /// Returns true if a constructor is registered for `kind`.
    pub fn supports(&self, kind: BackendKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Creates an adapter instance from the given configuration.
    ///
    /// # Errors
    /// Returns a `FactoryError` if no constructor is registered for the kind or
    /// the constructor rejects the configuration.
    pub fn create(&self, config: &BackendConfig) -> Result<Arc<dyn Model>, FactoryError> {
        debug!(backend = %config.id, kind = %config.kind, "Creating backend adapter");

        let constructor =
            self.constructors.get(&config.kind).ok_or(FactoryError::NoConstructor(config.kind))?;
        constructor(config)
    }
}

fn build_echo(config: &BackendConfig) -> Result<Arc<dyn Model>, FactoryError> {
    Ok(Arc::new(EchoModel::new(config.id.clone())))
}

fn build_mock(config: &BackendConfig) -> Result<Arc<dyn Model>, FactoryError> {
    Ok(Arc::new(MockModel::new(config.id.clone())))
}

fn build_openai_compatible(config: &BackendConfig) -> Result<Arc<dyn Model>, FactoryError> {
    let base_url = config
        .base_url
        .clone()
        .ok_or(FactoryError::MissingField { backend: config.id.clone(), field: "base_url" })?;

    let mut model = match &config.api_key {
        Some(key) => UniversalModel::with_api_key(config.id.clone(), base_url, key.clone()),
        None => UniversalModel::without_auth(config.id.clone(), base_url),
    };
    if let Some(default_model) = &config.default_model {
        model = model.with_default_model(default_model.clone());
    }
    if let Some(timeout) = config.timeout {
        model = model
            .with_timeout(timeout)
            .map_err(|source| FactoryError::Adapter { backend: config.id.clone(), source })?;
    }
    Ok(Arc::new(model))
}

fn build_claude(config: &BackendConfig) -> Result<Arc<dyn Model>, FactoryError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or(FactoryError::MissingField { backend: config.id.clone(), field: "api_key" })?;

    let mut model = ClaudeModel::with_api_key(config.id.clone(), api_key);
    if let Some(base_url) = &config.base_url {
        model = model.with_base_url(base_url.clone());
    }
    if let Some(default_model) = &config.default_model {
        model = model.with_default_model(default_model.clone());
    }
    if let Some(timeout) = config.timeout {
        model = model
            .with_timeout(timeout)
            .map_err(|source| FactoryError::Adapter { backend: config.id.clone(), source })?;
    }
    Ok(Arc::new(model))
}
