//! Structured routing events.
//!
//! The router and the circuit breakers describe what they do as
//! [`RoutingEvent`]s handed to an injected [`EventSink`]. Sinks never fail the
//! call that produced the event.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Something the routing layer did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingEvent {
    /// A request arrived for a logical model and missed the cache.
    RoutingStart {
        /// Logical model name.
        model: String,
        /// Backend identifier.
        backend: String,
    },
    /// The response came from the cache.
    CacheHit {
        /// Logical model name.
        model: String,
        /// Backend identifier.
        backend: String,
    },
    /// The backend produced a response.
    RoutingSuccess {
        /// Logical model name.
        model: String,
        /// Backend identifier.
        backend: String,
        /// Wall time of the backend call.
        latency_ms: u64,
        /// Length of the response text in bytes.
        response_len: usize,
    },
    /// The backend call failed.
    RoutingFailure {
        /// Logical model name.
        model: String,
        /// Backend identifier.
        backend: String,
        /// Short failure label (see `ModelError::kind`).
        error_kind: String,
        /// Rendered error.
        message: String,
    },
    /// The logical model name is not in the registry.
    ModelNotFound {
        /// Requested model name.
        model: String,
    },
    /// A breaker tripped to OPEN.
    BreakerOpened {
        /// Backend identifier.
        backend: String,
        /// Consecutive failures at the time of the trip.
        consecutive_failures: u32,
        /// Cooldown before the next trial.
        cooldown_ms: u64,
        /// Whether the trip came from a failed HALF_OPEN trial.
        from_trial: bool,
    },
    /// A breaker admitted its HALF_OPEN trial call.
    BreakerHalfOpen {
        /// Backend identifier.
        backend: String,
    },
    /// A breaker recovered to CLOSED.
    BreakerClosed {
        /// Backend identifier.
        backend: String,
    },
    /// A call was refused by an open breaker.
    CallRejected {
        /// Backend identifier.
        backend: String,
        /// Time until the next trial may be admitted.
        retry_in_ms: u64,
    },
}

impl RoutingEvent {
    /// The event's type tag, matching its serialized `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoutingStart { .. } => "routing_start",
            Self::CacheHit { .. } => "cache_hit",
            Self::RoutingSuccess { .. } => "routing_success",
            Self::RoutingFailure { .. } => "routing_failure",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::BreakerOpened { .. } => "breaker_opened",
            Self::BreakerHalfOpen { .. } => "breaker_half_open",
            Self::BreakerClosed { .. } => "breaker_closed",
            Self::CallRejected { .. } => "call_rejected",
        }
    }
}

/// An event with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event itself.
    #[serde(flatten)]
    pub event: RoutingEvent,
}

/// Receiver for routing events.
pub trait EventSink: Send + Sync {
    /// Accepts one event. Must not block for long and must not panic.
    fn emit(&self, event: RoutingEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: RoutingEvent) {}
}

/// Forwards events to `tracing` at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RoutingEvent) {
        match &event {
            RoutingEvent::RoutingFailure { model, backend, error_kind, message } => {
                warn!(model = %model, backend = %backend, error_kind = %error_kind, error = %message, "Routing failed");
            }
            RoutingEvent::BreakerOpened { backend, consecutive_failures, cooldown_ms, from_trial } => {
                warn!(
                    backend = %backend,
                    consecutive_failures,
                    cooldown_ms,
                    from_trial,
                    "Circuit breaker opened"
                );
            }
            RoutingEvent::BreakerClosed { backend } => {
                info!(backend = %backend, "Circuit breaker closed");
            }
            RoutingEvent::ModelNotFound { model } => {
                warn!(model = %model, "Unknown model requested");
            }
            other => debug!(event = other.kind(), details = ?other, "Routing event"),
        }
    }
}

/// Bounded in-memory history of routing events.
///
/// Oldest events are dropped once `capacity` is reached.
#[derive(Debug)]
pub struct EventStore {
    events: Mutex<VecDeque<RecordedEvent>>,
    capacity: usize,
}

/// Default number of events an [`EventStore`] keeps.
pub const DEFAULT_EVENT_CAPACITY: usize = 10_000;

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventStore {
    /// Creates a store that keeps at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))), capacity }
    }

    /// Most recent events, newest last, optionally filtered by kind.
    pub fn recent(&self, kind: Option<&str>, limit: usize) -> Vec<RecordedEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let mut selected: Vec<RecordedEvent> = events
            .iter()
            .rev()
            .filter(|e| kind.is_none_or(|k| e.event.kind() == k))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every stored event.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for EventStore {
    fn emit(&self, event: RoutingEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(RecordedEvent { timestamp: Utc::now(), event });
    }
}

/// Delivers every event to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: RoutingEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(model: &str) -> RoutingEvent {
        RoutingEvent::CacheHit { model: model.to_string(), backend: "echo".to_string() }
    }

    #[test]
    fn test_event_store_is_bounded() {
        let store = EventStore::new(3);
        for i in 0..5 {
            store.emit(hit(&format!("m{i}")));
        }
        assert_eq!(store.len(), 3);

        let recent = store.recent(None, 10);
        assert_eq!(recent.first().unwrap().event, hit("m2"));
        assert_eq!(recent.last().unwrap().event, hit("m4"));
    }

    #[test]
    fn test_event_store_filters_by_kind() {
        let store = EventStore::new(10);
        store.emit(hit("a"));
        store.emit(RoutingEvent::ModelNotFound { model: "ghost".to_string() });
        store.emit(hit("b"));

        let hits = store.recent(Some("cache_hit"), 10);
        assert_eq!(hits.len(), 2);
        let last_one = store.recent(Some("cache_hit"), 1);
        assert_eq!(last_one[0].event, hit("b"));
        assert!(store.recent(Some("breaker_opened"), 10).is_empty());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(RoutingEvent::BreakerClosed { backend: "x".into() }).unwrap();
        assert_eq!(json["type"], "breaker_closed");
        assert_eq!(json["backend"], "x");
    }

    #[test]
    fn test_fanout_delivers_to_all() {
        let a = Arc::new(EventStore::new(10));
        let b = Arc::new(EventStore::new(10));
        let fanout = FanoutSink::new().with_sink(a.clone()).with_sink(b.clone());
        fanout.emit(hit("m"));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
