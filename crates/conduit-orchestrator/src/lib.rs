//! Request routing for Conduit.
//!
//! A [`Router`] maps logical model names to backend adapters. Each backend
//! sits behind its own [`CircuitBreaker`]; successful responses may be served
//! from a shared [`ResponseCache`](conduit_models::ResponseCache).

pub mod routing;

pub use routing::{
    BreakerConfig, BreakerSnapshot, Capability, CircuitBreaker, CircuitError, CircuitOpen, CircuitState,
    ConfigError, EventSink, EventStore, FanoutSink, ModelCost, ModelDescriptor, ModelRegistry, ModelSummary,
    NoopEventSink, RecordedEvent, RegistryError, RoutedResponse, Router, RouterBuilder, RouterConfig,
    RoutingConfig, RoutingConfigLoader, RoutingError, RoutingEvent, TracingEventSink,
};
