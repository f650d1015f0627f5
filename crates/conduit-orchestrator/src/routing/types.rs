//! Types for the model routing system.

use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_abstraction::{ModelError, ModelUsage};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by [`Router::route`](super::Router::route).
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The logical model name is not in the registry.
    #[error("Model not found: '{model}'")]
    ModelNotFound {
        /// Requested model name.
        model: String,
    },

    /// The registry names a backend that has no adapter.
    #[error("Backend '{backend}' for model '{model}' is not configured")]
    BackendUnavailable {
        /// Logical model name.
        model: String,
        /// Backend identifier.
        backend: String,
    },

    /// The backend's breaker refused the call; the adapter was not invoked.
    #[error("Circuit open for backend '{backend}'; retry in {}ms", retry_in.as_millis())]
    CircuitOpen {
        /// Backend identifier.
        backend: String,
        /// Time until the next trial may be admitted.
        retry_in: Duration,
        /// Wall-clock time of the next allowed attempt.
        retry_at: DateTime<Utc>,
    },

    /// The adapter was invoked and failed.
    #[error("Backend '{backend}' failed for model '{model}': {source}")]
    Adapter {
        /// Logical model name.
        model: String,
        /// Backend identifier.
        backend: String,
        /// Adapter error.
        #[source]
        source: ModelError,
    },
}

impl RoutingError {
    /// Short machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound { .. } => "model_not_found",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Adapter { .. } => "adapter_error",
        }
    }
}

/// Result of a routed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedResponse {
    /// Response text.
    pub content: String,
    /// Logical model name that was requested.
    pub model: String,
    /// Backend that served (or originally served) the response.
    pub backend: String,
    /// Whether the response came from the cache.
    pub cached: bool,
    /// Token usage reported by the backend; absent for cache hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ModelUsage>,
    /// Wall time spent inside [`Router::route`](super::Router::route).
    pub latency_ms: u64,
}
