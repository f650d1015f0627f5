//! Composition root.
//!
//! Builds the runtime in dependency order: adapters, one breaker per
//! backend, the response cache and its sweeper, the event store, the router
//! and finally the workflow engine.

use std::sync::Arc;

use conduit_models::{BackendConfig, BackendKind, CacheConfigError, ModelFactory, ResponseCache};
use conduit_orchestrator::{
    CircuitBreaker, EventSink, EventStore, FanoutSink, ModelRegistry, RegistryError, Router, RouterBuilder,
    TracingEventSink,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Settings, SettingsError};
use crate::workflow::WorkflowEngine;

/// Errors raised while assembling the runtime.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Settings were invalid.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The model registry could not be loaded.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The cache configuration was rejected.
    #[error("Invalid cache configuration: {0}")]
    Cache(#[from] CacheConfigError),

    /// No registry path was configured.
    #[error("No model registry configured; set `registry` in conduit.toml or CONDUIT_REGISTRY")]
    NoRegistry,
}

/// A backend that could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBackend {
    /// Backend identifier.
    pub id: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Every long-lived component, wired together.
pub struct Runtime {
    settings: Settings,
    registry: Arc<ModelRegistry>,
    events: Arc<EventStore>,
    cache: Option<Arc<ResponseCache>>,
    router: Arc<Router>,
    engine: Arc<WorkflowEngine>,
    skipped: Vec<SkippedBackend>,
    sweeper: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Loads the registry named in `settings` and builds the runtime,
    /// reading API keys from the process environment.
    ///
    /// # Errors
    /// Returns `BootstrapError` if no registry is configured or it cannot be
    /// loaded, or if the settings are invalid.
    pub fn from_settings(settings: Settings, factory: &ModelFactory) -> Result<Self, BootstrapError> {
        let path = settings.registry.clone().ok_or(BootstrapError::NoRegistry)?;
        let registry = ModelRegistry::load(&path)?;
        Self::build(settings, registry, factory)
    }

    /// Builds the runtime, reading API keys from the process environment.
    ///
    /// # Errors
    /// Returns `BootstrapError` if the settings are invalid.
    pub fn build(settings: Settings, registry: ModelRegistry, factory: &ModelFactory) -> Result<Self, BootstrapError> {
        Self::build_with_env(settings, registry, factory, |var| std::env::var(var).ok())
    }

    /// Builds the runtime, resolving API key variables through `env`.
    ///
    /// Backends whose adapter cannot be constructed are skipped with a
    /// warning; models on them fail with `BackendUnavailable`. Registry
    /// backends named `echo` or `mock` need no settings entry.
    ///
    /// # Errors
    /// Returns `BootstrapError` if the settings are invalid.
    pub fn build_with_env(
        settings: Settings,
        registry: ModelRegistry,
        factory: &ModelFactory,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, BootstrapError> {
        settings.validate()?;

        let mut configs = Vec::with_capacity(settings.backends.len());
        for backend in &settings.backends {
            configs.push(backend.to_backend_config(&env)?);
        }
        for backend in registry.backends() {
            if configs.iter().any(|c| c.id == backend) {
                continue;
            }
            let kind = match backend.as_str() {
                "echo" => BackendKind::Echo,
                "mock" => BackendKind::Mock,
                _ => continue,
            };
            configs.push(BackendConfig::new(backend, kind));
        }

        let events = Arc::new(EventStore::default());
        let sink: Arc<dyn EventSink> =
            Arc::new(FanoutSink::new().with_sink(events.clone()).with_sink(Arc::new(TracingEventSink)));

        let registry = Arc::new(registry);
        let mut builder = RouterBuilder::new(Arc::clone(&registry))
            .with_event_sink(Arc::clone(&sink))
            .with_request_timeout(settings.router.request_timeout());

        let mut skipped = Vec::new();
        for config in &configs {
            match factory.create(config) {
                Ok(adapter) => {
                    let breaker = CircuitBreaker::new(config.id.clone(), settings.breaker.clone())
                        .with_event_sink(Arc::clone(&sink));
                    builder = builder.with_backend(config.id.clone(), adapter, Arc::new(breaker));
                    info!(backend = %config.id, kind = %config.kind, "Backend ready");
                }
                Err(err) => {
                    warn!(backend = %config.id, error = %err, "Skipping backend");
                    skipped.push(SkippedBackend { id: config.id.clone(), reason: err.to_string() });
                }
            }
        }

        let (cache, sweeper) = if settings.cache.enabled {
            let cache = Arc::new(ResponseCache::new(settings.cache.clone())?);
            let sweeper = tokio::runtime::Handle::try_current().ok().map(|_| cache.spawn_sweeper());
            builder = builder.with_cache(Arc::clone(&cache));
            (Some(cache), sweeper)
        } else {
            (None, None)
        };

        let router = Arc::new(builder.build());
        let engine = Arc::new(
            WorkflowEngine::new(router.clone()).with_max_iterations(settings.workflow.max_iterations),
        );

        info!(
            models = registry.len(),
            backends = configs.len() - skipped.len(),
            skipped = skipped.len(),
            cache = cache.is_some(),
            "Runtime assembled"
        );

        Ok(Self { settings, registry, events, cache, router, engine, skipped, sweeper })
    }

    /// Effective settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Routing event history.
    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// The response cache, when enabled.
    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    /// The router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The workflow engine.
    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Backends that failed to start.
    pub fn skipped_backends(&self) -> &[SkippedBackend] {
        &self.skipped
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
