//! Request router.
//!
//! Resolves a logical model name through the [`ModelRegistry`], consults the
//! response cache, then sends the request through the backend's
//! [`CircuitBreaker`] to its adapter. There are no retries at this layer:
//! adapters own transport retries, and the breaker decides whether the
//! backend is called at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use conduit_abstraction::{Model, ModelError, ModelParameters, ModelResponse};
use conduit_models::{CacheStats, ResponseCache};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitError};
use super::events::{EventSink, NoopEventSink, RoutingEvent};
use super::registry::{ModelDescriptor, ModelRegistry};
use super::types::{RoutedResponse, RoutingError};

/// An adapter and the breaker guarding it.
#[derive(Clone)]
struct BackendSlot {
    adapter: Arc<dyn Model>,
    breaker: Arc<CircuitBreaker>,
}

/// A model as reported by [`Router::describe_models`].
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    /// Registry entry.
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    /// Whether the backend has an adapter.
    pub available: bool,
}

/// Routes requests for logical models to backend adapters.
pub struct Router {
    registry: Arc<ModelRegistry>,
    backends: HashMap<String, BackendSlot>,
    cache: Option<Arc<ResponseCache>>,
    events: Arc<dyn EventSink>,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("models", &self.registry.len())
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("cache", &self.cache.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Router`].
pub struct RouterBuilder {
    registry: Arc<ModelRegistry>,
    backends: HashMap<String, BackendSlot>,
    cache: Option<Arc<ResponseCache>>,
    events: Arc<dyn EventSink>,
    request_timeout: Option<Duration>,
}

impl RouterBuilder {
    /// Starts a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            backends: HashMap::new(),
            cache: None,
            events: Arc::new(NoopEventSink),
            request_timeout: None,
        }
    }

    /// Registers the adapter and breaker for a backend.
    #[must_use]
    pub fn with_backend(
        mut self,
        backend: impl Into<String>,
        adapter: Arc<dyn Model>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        self.backends.insert(backend.into(), BackendSlot { adapter, breaker });
        self
    }

    /// Enables response caching.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets where routing events go.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Bounds each backend call; an elapsed call counts as a failure.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Finishes the router.
    ///
    /// Descriptors whose backend has no adapter are kept; requests for them
    /// fail with [`RoutingError::BackendUnavailable`].
    #[must_use]
    pub fn build(self) -> Router {
        for backend in self.registry.backends() {
            if !self.backends.contains_key(&backend) {
                warn!(backend = %backend, "Model registry references a backend with no adapter");
            }
        }
        Router {
            registry: self.registry,
            backends: self.backends,
            cache: self.cache,
            events: self.events,
            request_timeout: self.request_timeout,
        }
    }
}

impl Router {
    /// Sends `prompt` to the backend serving `model`.
    ///
    /// # Arguments
    /// * `model` - Logical model name from the registry
    /// * `prompt` - Prompt text
    /// * `parameters` - Generation parameters; part of the cache key
    ///
    /// # Errors
    /// * `ModelNotFound` if `model` is not registered (cache and breaker are
    ///   not touched)
    /// * `BackendUnavailable` if the backend has no adapter
    /// * `CircuitOpen` if the backend's breaker refused the call
    /// * `Adapter` if the backend was called and failed
    pub async fn route(
        &self,
        model: &str,
        prompt: &str,
        parameters: &ModelParameters,
    ) -> Result<RoutedResponse, RoutingError> {
        let started = Instant::now();

        let Some(descriptor) = self.registry.get(model) else {
            self.events.emit(RoutingEvent::ModelNotFound { model: model.to_string() });
            return Err(RoutingError::ModelNotFound { model: model.to_string() });
        };
        let backend = descriptor.backend.as_str();
        let Some(slot) = self.backends.get(backend) else {
            return Err(RoutingError::BackendUnavailable {
                model: model.to_string(),
                backend: backend.to_string(),
            });
        };

        let cache_key = self.cache.as_ref().and_then(|cache| cache.key_for(model, prompt, parameters));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(content) = cache.get(key).await {
                debug!(model = %model, backend = %backend, "Serving response from cache");
                self.events.emit(RoutingEvent::CacheHit {
                    model: model.to_string(),
                    backend: backend.to_string(),
                });
                return Ok(RoutedResponse {
                    content,
                    model: model.to_string(),
                    backend: backend.to_string(),
                    cached: true,
                    usage: None,
                    latency_ms: elapsed_ms(started),
                });
            }
        }

        self.events.emit(RoutingEvent::RoutingStart {
            model: model.to_string(),
            backend: backend.to_string(),
        });

        let mut request = parameters.clone();
        request.model = Some(descriptor.model_name.clone());
        let call_started = Instant::now();
        let outcome = slot
            .breaker
            .execute(|| self.call_adapter(slot.adapter.as_ref(), prompt, request))
            .await;

        match outcome {
            Ok(response) => {
                let latency_ms = elapsed_ms(call_started);
                if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                    cache.put(key, response.content.clone()).await;
                }
                self.events.emit(RoutingEvent::RoutingSuccess {
                    model: model.to_string(),
                    backend: backend.to_string(),
                    latency_ms,
                    response_len: response.content.len(),
                });
                Ok(RoutedResponse {
                    content: response.content,
                    model: model.to_string(),
                    backend: backend.to_string(),
                    cached: false,
                    usage: response.usage,
                    latency_ms: elapsed_ms(started),
                })
            }
            Err(CircuitError::Open(open)) => Err(RoutingError::CircuitOpen {
                backend: open.backend,
                retry_in: open.retry_in,
                retry_at: open.retry_at,
            }),
            Err(CircuitError::Call(source)) => {
                self.events.emit(RoutingEvent::RoutingFailure {
                    model: model.to_string(),
                    backend: backend.to_string(),
                    error_kind: source.kind().to_string(),
                    message: source.to_string(),
                });
                Err(RoutingError::Adapter {
                    model: model.to_string(),
                    backend: backend.to_string(),
                    source,
                })
            }
        }
    }

    async fn call_adapter(
        &self,
        adapter: &dyn Model,
        prompt: &str,
        request: ModelParameters,
    ) -> Result<ModelResponse, ModelError> {
        let call = adapter.generate_text(prompt, Some(request));
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ModelError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }

    /// Registered logical model names, sorted.
    pub fn list_models(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Registered models with adapter availability, sorted by name.
    pub fn describe_models(&self) -> Vec<ModelSummary> {
        self.registry
            .iter()
            .map(|descriptor| ModelSummary {
                available: self.backends.contains_key(&descriptor.backend),
                descriptor: descriptor.clone(),
            })
            .collect()
    }

    /// Breaker state for every configured backend.
    pub fn backend_health(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.backends
            .iter()
            .map(|(id, slot)| (id.clone(), slot.breaker.snapshot()))
            .collect()
    }

    /// The breaker guarding `backend`, if configured.
    pub fn breaker(&self, backend: &str) -> Option<&Arc<CircuitBreaker>> {
        self.backends.get(backend).map(|slot| &slot.breaker)
    }

    /// Cache counters, or `None` when caching is off.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    /// The model registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::config::BreakerConfig;
    use crate::routing::events::EventStore;
    use async_trait::async_trait;
    use conduit_models::{CacheConfig, EchoModel};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records the parameters it was called with.
    struct RecordingModel {
        seen: Mutex<Vec<ModelParameters>>,
    }

    #[async_trait]
    impl Model for RecordingModel {
        async fn generate_text(
            &self,
            prompt: &str,
            parameters: Option<ModelParameters>,
        ) -> Result<ModelResponse, ModelError> {
            self.seen.lock().unwrap().push(parameters.unwrap_or_default());
            Ok(ModelResponse::text(prompt.to_uppercase()))
        }

        fn model_id(&self) -> &str {
            "recording"
        }
    }

    struct FailingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Model for FailingModel {
        async fn generate_text(
            &self,
            _prompt: &str,
            _parameters: Option<ModelParameters>,
        ) -> Result<ModelResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::ModelResponseError("Server error (503): down".to_string()))
        }

        fn model_id(&self) -> &str {
            "failing"
        }
    }

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(
            ModelRegistry::new()
                .with_descriptor(ModelDescriptor::new("fast", "primary").with_model_name("vendor-fast-001"))
                .with_descriptor(ModelDescriptor::new("orphan", "missing")),
        )
    }

    fn breaker(backend: &str) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(backend, BreakerConfig::new(2, Duration::from_secs(30))))
    }

    #[tokio::test]
    async fn test_route_sends_provider_model_name() {
        let adapter = Arc::new(RecordingModel { seen: Mutex::new(Vec::new()) });
        let router = RouterBuilder::new(registry())
            .with_backend("primary", adapter.clone(), breaker("primary"))
            .build();

        let params = ModelParameters::new().with_temperature(0.2);
        let response = router.route("fast", "hello", &params).await.unwrap();

        assert_eq!(response.content, "HELLO");
        assert_eq!(response.backend, "primary");
        assert!(!response.cached);
        let seen = adapter.seen.lock().unwrap();
        assert_eq!(seen[0].model.as_deref(), Some("vendor-fast-001"));
        assert_eq!(seen[0].temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_unknown_model_touches_nothing() {
        let events = Arc::new(EventStore::new(16));
        let cache = Arc::new(ResponseCache::new(CacheConfig::default()).unwrap());
        let router = RouterBuilder::new(registry())
            .with_backend("primary", Arc::new(EchoModel::new("echo".to_string())), breaker("primary"))
            .with_cache(cache.clone())
            .with_event_sink(events.clone())
            .build();

        let err = router.route("ghost", "hi", &ModelParameters::default()).await.unwrap_err();
        assert!(matches!(err, RoutingError::ModelNotFound { ref model } if model == "ghost"));
        assert_eq!(cache.stats().await.total_misses, 0);
        assert_eq!(events.recent(None, 10).len(), 1);
        assert_eq!(events.recent(Some("model_not_found"), 10).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_backend_is_unavailable() {
        let router = RouterBuilder::new(registry()).build();
        let err = router.route("orphan", "hi", &ModelParameters::default()).await.unwrap_err();
        assert!(matches!(err, RoutingError::BackendUnavailable { ref backend, .. } if backend == "missing"));
        assert_eq!(err.kind(), "backend_unavailable");
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold() {
        let adapter = Arc::new(FailingModel { calls: AtomicUsize::new(0) });
        let router = RouterBuilder::new(registry())
            .with_backend("primary", adapter.clone(), breaker("primary"))
            .build();
        let params = ModelParameters::default();

        for _ in 0..2 {
            let err = router.route("fast", "hi", &params).await.unwrap_err();
            assert!(matches!(err, RoutingError::Adapter { .. }));
        }
        let err = router.route("fast", "hi", &params).await.unwrap_err();
        assert!(matches!(err, RoutingError::CircuitOpen { ref backend, .. } if backend == "primary"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_counts_as_failure() {
        struct SlowModel;

        #[async_trait]
        impl Model for SlowModel {
            async fn generate_text(
                &self,
                _prompt: &str,
                _parameters: Option<ModelParameters>,
            ) -> Result<ModelResponse, ModelError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(ModelResponse::text("late"))
            }

            fn model_id(&self) -> &str {
                "slow"
            }
        }

        let breaker = breaker("primary");
        let router = RouterBuilder::new(registry())
            .with_backend("primary", Arc::new(SlowModel), breaker.clone())
            .with_request_timeout(Some(Duration::from_secs(1)))
            .build();

        let err = router.route("fast", "hi", &ModelParameters::default()).await.unwrap_err();
        match err {
            RoutingError::Adapter { source: ModelError::Timeout(ms), .. } => assert_eq!(ms, 1000),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_describe_models_reports_availability() {
        let router = RouterBuilder::new(registry())
            .with_backend("primary", Arc::new(EchoModel::new("echo".to_string())), breaker("primary"))
            .build();

        assert_eq!(router.list_models(), vec!["fast".to_string(), "orphan".to_string()]);
        let summaries = router.describe_models();
        assert!(summaries[0].available);
        assert!(!summaries[1].available);
        assert_eq!(router.backend_health().len(), 1);
        assert!(router.cache_stats().await.is_none());
    }
}
