//! Model routing: registry lookup, response cache, per-backend circuit
//! breakers and structured routing events.

pub mod circuit_breaker;
pub mod config;
pub mod events;
pub mod registry;
pub mod router;
pub mod types;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitError, CircuitOpen, CircuitState};
pub use config::{BreakerConfig, ConfigError, RouterConfig, RoutingConfig, RoutingConfigLoader};
pub use events::{
    DEFAULT_EVENT_CAPACITY, EventSink, EventStore, FanoutSink, NoopEventSink, RecordedEvent, RoutingEvent,
    TracingEventSink,
};
pub use registry::{Capability, ModelCost, ModelDescriptor, ModelRegistry, RegistryError};
pub use router::{ModelSummary, Router, RouterBuilder};
pub use types::{RoutedResponse, RoutingError};
