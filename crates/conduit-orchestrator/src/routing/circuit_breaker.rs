//! Circuit breaker pattern for backend failure detection.
//!
//! One breaker guards one backend for the life of the process:
//!
//! - **CLOSED**: calls pass through; consecutive failures are counted and a
//!   success resets the count. Reaching the threshold trips the breaker.
//! - **OPEN**: calls are refused without reaching the backend until the
//!   cooldown elapses; the next call is then admitted as the single trial.
//! - **HALF_OPEN**: exactly one trial is in flight. Success closes the
//!   breaker; failure reopens it with a longer cooldown.
//!
//! The cooldown doubles after each failed trial up to `max_cooldown`, with
//! optional jitter. A trial that is dropped before it completes (timeout,
//! cancellation) counts as a failed trial.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::BreakerConfig;
use super::events::{EventSink, NoopEventSink, RoutingEvent};

/// Circuit breaker state for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - normal operation.
    Closed,
    /// Circuit is open - refusing calls until cooldown expires.
    Open,
    /// Circuit is half-open - one trial call is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Refusal returned while the breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit open for backend '{backend}'; retry in {}ms", retry_in.as_millis())]
pub struct CircuitOpen {
    /// Backend identifier.
    pub backend: String,
    /// Time until the next trial may be admitted. Zero while another
    /// caller's trial is in flight.
    pub retry_in: Duration,
    /// Wall-clock instant of the next allowed attempt.
    pub retry_at: DateTime<Utc>,
}

/// Outcome of a call made through [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker refused the call; the backend was not invoked.
    #[error(transparent)]
    Open(CircuitOpen),
    /// The backend was invoked and failed.
    #[error(transparent)]
    Call(E),
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    /// Backend identifier.
    pub backend: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted since the last success.
    pub consecutive_failures: u32,
    /// Number of times the breaker has tripped.
    pub total_trips: u64,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Cooldown that applies to the current (or next) open period.
    pub cooldown_ms: u64,
    /// When OPEN: wall-clock time of the next allowed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    failed_trials: u32,
    trial_in_flight: bool,
    total_trips: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker for one backend.
pub struct CircuitBreaker {
    /// Backend this breaker guards.
    backend: String,
    /// Threshold, cooldown and backoff settings.
    config: BreakerConfig,
    /// Mutable state; every transition happens under this lock.
    inner: Mutex<BreakerInner>,
    /// Where transitions are reported.
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for `backend`.
    ///
    /// # Arguments
    /// * `backend` - Backend identifier
    /// * `config` - Threshold, cooldown and backoff settings
    #[must_use]
    pub fn new(backend: impl Into<String>, config: BreakerConfig) -> Self {
        let current_cooldown = config.cooldown();
        Self {
            backend: backend.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                current_cooldown,
                failed_trials: 0,
                trial_in_flight: false,
                total_trips: 0,
            }),
            events: Arc::new(NoopEventSink),
        }
    }

    /// Reports transitions to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Backend identifier.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Breaker settings.
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `call` if the breaker admits it and records the outcome.
    ///
    /// # Errors
    /// Returns `CircuitError::Open` without invoking `call` while the breaker
    /// is open, or `CircuitError::Call` with the call's own error.
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().map_err(CircuitError::Open)?;
        let mut guard = TrialGuard { breaker: self, armed: admission == Admission::Trial };

        let result = call().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(admission),
            Err(_) => self.record_failure(admission),
        }
        result.map_err(CircuitError::Call)
    }

    fn admit(&self) -> Result<Admission, CircuitOpen> {
        let (outcome, event) = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => (Ok(Admission::Normal), None),
                CircuitState::Open => {
                    let remaining = Self::remaining_cooldown(&inner, Instant::now());
                    if remaining.is_zero() {
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        info!(backend = %self.backend, "Circuit breaker: Open -> HalfOpen (admitting trial)");
                        (
                            Ok(Admission::Trial),
                            Some(RoutingEvent::BreakerHalfOpen { backend: self.backend.clone() }),
                        )
                    } else {
                        (Err(self.refusal(remaining)), None)
                    }
                }
                CircuitState::HalfOpen => (Err(self.refusal(Duration::ZERO)), None),
            }
        };

        if let Some(event) = event {
            self.events.emit(event);
        }
        if let Err(open) = &outcome {
            debug!(
                backend = %self.backend,
                retry_in_ms = open.retry_in.as_millis() as u64,
                "Circuit breaker refused call"
            );
            self.events.emit(RoutingEvent::CallRejected {
                backend: self.backend.clone(),
                retry_in_ms: open.retry_in.as_millis() as u64,
            });
        }
        outcome
    }

    fn refusal(&self, retry_in: Duration) -> CircuitOpen {
        let retry_at = Utc::now()
            + chrono::Duration::from_std(retry_in).unwrap_or_else(|_| chrono::Duration::zero());
        CircuitOpen { backend: self.backend.clone(), retry_in, retry_at }
    }

    fn remaining_cooldown(inner: &BreakerInner, now: Instant) -> Duration {
        inner
            .opened_at
            .map(|opened| (opened + inner.current_cooldown).saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Records a successful call. Only the trial's own outcome resolves
    /// HALF_OPEN.
    fn record_success(&self, admission: Admission) {
        let event = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::HalfOpen if admission == Admission::Trial => {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.failed_trials = 0;
                    inner.trial_in_flight = false;
                    inner.opened_at = None;
                    inner.current_cooldown = self.config.cooldown();
                    info!(backend = %self.backend, "Circuit breaker: HalfOpen -> Closed (recovery successful)");
                    Some(RoutingEvent::BreakerClosed { backend: self.backend.clone() })
                }
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                // A call admitted before the trip finished late.
                CircuitState::HalfOpen | CircuitState::Open => None,
            }
        };
        if let Some(event) = event {
            self.events.emit(event);
        }
    }

    /// Records a failed call.
    fn record_failure(&self, admission: Admission) {
        let event = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        Some(self.trip(&mut inner, false))
                    } else {
                        debug!(
                            backend = %self.backend,
                            consecutive_failures = inner.consecutive_failures,
                            threshold = self.config.failure_threshold,
                            "Circuit breaker recorded failure"
                        );
                        None
                    }
                }
                CircuitState::HalfOpen if admission == Admission::Trial => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    inner.trial_in_flight = false;
                    inner.failed_trials = inner.failed_trials.saturating_add(1);
                    Some(self.trip(&mut inner, true))
                }
                CircuitState::HalfOpen | CircuitState::Open => None,
            }
        };
        if let Some(event) = event {
            self.events.emit(event);
        }
    }

    fn trip(&self, inner: &mut BreakerInner, from_trial: bool) -> RoutingEvent {
        let cooldown = self.cooldown_for(inner.failed_trials);
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.current_cooldown = cooldown;
        inner.total_trips += 1;

        if from_trial {
            warn!(
                backend = %self.backend,
                cooldown_ms = cooldown.as_millis() as u64,
                failed_trials = inner.failed_trials,
                "Circuit breaker: HalfOpen -> Open (trial failed)"
            );
        } else {
            warn!(
                backend = %self.backend,
                consecutive_failures = inner.consecutive_failures,
                cooldown_ms = cooldown.as_millis() as u64,
                "Circuit breaker: Closed -> Open (failure threshold reached)"
            );
        }

        RoutingEvent::BreakerOpened {
            backend: self.backend.clone(),
            consecutive_failures: inner.consecutive_failures,
            cooldown_ms: cooldown.as_millis() as u64,
            from_trial,
        }
    }

    /// Cooldown after `failed_trials` consecutive failed trials:
    /// `cooldown * 2^failed_trials`, capped at `max_cooldown`, then spread by
    /// `±jitter`.
    fn cooldown_for(&self, failed_trials: u32) -> Duration {
        let base = self.config.cooldown();
        let max = self.config.max_cooldown();
        let factor = 2u32.saturating_pow(failed_trials.min(31));
        let backed_off = base.saturating_mul(factor).min(max);

        if self.config.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter);
            backed_off.mul_f64(1.0 + spread)
        } else {
            backed_off
        }
    }

    /// Current state. An OPEN breaker whose cooldown has elapsed still reports
    /// OPEN until a call arrives to be admitted as the trial.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Point-in-time view for health reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        let retry_at = (inner.state == CircuitState::Open).then(|| {
            let remaining = Self::remaining_cooldown(&inner, Instant::now());
            Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
        });
        BreakerSnapshot {
            backend: self.backend.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_trips: inner.total_trips,
            failure_threshold: self.config.failure_threshold,
            cooldown_ms: inner.current_cooldown.as_millis() as u64,
            retry_at,
        }
    }

    /// Forces the breaker back to CLOSED and clears its counters.
    pub fn reset(&self) {
        let was = {
            let mut inner = self.lock();
            let was = inner.state;
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.failed_trials = 0;
            inner.trial_in_flight = false;
            inner.opened_at = None;
            inner.current_cooldown = self.config.cooldown();
            was
        };
        info!(backend = %self.backend, previous = %was, "Circuit breaker reset");
        if was != CircuitState::Closed {
            self.events.emit(RoutingEvent::BreakerClosed { backend: self.backend.clone() });
        }
    }
}

/// Records a failed trial if the trial future is dropped before completing.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(backend = %self.breaker.backend, "Circuit breaker trial abandoned; counting as failure");
            self.breaker.record_failure(Admission::Trial);
        }
    }
}
