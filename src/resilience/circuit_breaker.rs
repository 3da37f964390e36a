//! Global circuit breaker for service-wide load protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed overloaded, requests fail fast
//! - Half-Open: a bounded batch of trial requests probes recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: in-flight >= max_concurrent or window requests >= max_rps
//! Open → Half-Open: on the first allow() after open_timeout
//! Half-Open → Closed: every trial of the current batch succeeded
//! Half-Open → Open: a trial failed, or a limit tripped while probing
//! ```
//!
//! # Design Decisions
//! - One breaker for the whole service, not per backend
//! - The RPS window is a fixed 1-second bucket reset by a periodic task
//! - Admissions are tokens: `done` consumes one, so accounting is exactly-once
//! - Only trials admitted in the current half-open batch can close the circuit

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::http::response::Rejection;
use crate::lifecycle::{spawn_periodic, BackgroundTasks, Shutdown};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of admission returned by [`CircuitBreaker::allow`].
///
/// Must be handed back through [`CircuitBreaker::done`] exactly once.
#[derive(Debug)]
#[must_use = "an admission must be released with CircuitBreaker::done"]
pub struct Admission {
    /// Half-open batch this request is a trial of, if any.
    trial_batch: Option<u64>,
    /// Reset generation the request was admitted in.
    generation: u64,
}

impl Admission {
    pub fn is_trial(&self) -> bool {
        self.trial_batch.is_some()
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    request_count: u64,
    opened_at: Option<Instant>,
    half_open_since: Option<Instant>,
    half_open_reqs: u64,
    half_open_successes: u64,
    /// Incremented on every transition into half-open.
    batch: u64,
    /// Incremented by manual reset; releases from older generations skip concurrency accounting.
    generation: u64,
}

/// Service-wide admission gate.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerState>,
    concurrent: AtomicI64,

    max_concurrent: u64,
    max_requests_per_sec: u64,
    open_timeout: Duration,
    half_open_max_reqs: u64,

    total_requests: AtomicU64,
    rejected_count: AtomicU64,
    success_count: AtomicU64,
    circuit_openings: AtomicU64,
}

impl CircuitBreaker {
    /// Trial requests admitted per half-open batch unless configured otherwise.
    pub const DEFAULT_HALF_OPEN_MAX: u64 = 5;

    pub fn new(max_concurrent: u64, max_requests_per_sec: u64, open_timeout: Duration) -> Self {
        Self::with_half_open_max(
            max_concurrent,
            max_requests_per_sec,
            open_timeout,
            Self::DEFAULT_HALF_OPEN_MAX,
        )
    }

    pub fn with_half_open_max(
        max_concurrent: u64,
        max_requests_per_sec: u64,
        open_timeout: Duration,
        half_open_max_reqs: u64,
    ) -> Self {
        tracing::info!(
            max_concurrent,
            max_rps = max_requests_per_sec,
            open_timeout = ?open_timeout,
            half_open_max = half_open_max_reqs,
            "Circuit breaker configured"
        );

        Self {
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                request_count: 0,
                opened_at: None,
                half_open_since: None,
                half_open_reqs: 0,
                half_open_successes: 0,
                batch: 0,
                generation: 0,
            }),
            concurrent: AtomicI64::new(0),
            max_concurrent,
            max_requests_per_sec,
            open_timeout,
            half_open_max_reqs: half_open_max_reqs.max(1),
            total_requests: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            circuit_openings: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::with_half_open_max(
            config.max_concurrent,
            config.max_requests_per_sec,
            Duration::from_secs(config.open_timeout_secs),
            config.half_open_max_requests,
        )
    }

    /// Decide whether a request may proceed.
    ///
    /// On rejection returns the state observed while deciding.
    pub fn allow(&self) -> Result<Admission, CircuitState> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::MAX);
            if elapsed <= self.open_timeout {
                return self.reject(CircuitState::Open);
            }
            self.enter_half_open(&mut inner, now);
        }

        let mut trial_batch = None;
        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_reqs >= self.half_open_max_reqs {
                let batch_age = inner
                    .half_open_since
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);
                if batch_age <= self.open_timeout {
                    return self.reject(CircuitState::HalfOpen);
                }
                self.enter_half_open(&mut inner, now);
            }
            inner.half_open_reqs += 1;
            trial_batch = Some(inner.batch);
        }

        if self.concurrent.load(Ordering::SeqCst) >= self.max_concurrent as i64 {
            self.trip(&mut inner, now, "concurrent limit exceeded");
            return self.reject(inner.state);
        }

        if inner.request_count >= self.max_requests_per_sec {
            self.trip(&mut inner, now, "RPS limit exceeded");
            return self.reject(inner.state);
        }

        let in_flight = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        inner.request_count += 1;
        metrics::record_in_flight(in_flight);

        Ok(Admission {
            trial_batch,
            generation: inner.generation,
        })
    }

    /// Release an admitted request.
    ///
    /// `success` is false for 5xx responses and panics. A failed trial re-opens
    /// the circuit; the last successful trial of a batch closes it.
    pub fn done(&self, admission: Admission, success: bool) {
        let mut inner = self.inner.lock();

        if admission.generation == inner.generation {
            let previous = self
                .concurrent
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)))
                .unwrap_or(0);
            metrics::record_in_flight((previous - 1).max(0));
        }

        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        }

        let current_trial = inner.state == CircuitState::HalfOpen
            && admission.trial_batch == Some(inner.batch)
            && admission.generation == inner.generation;
        if !current_trial {
            return;
        }

        if success {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.half_open_max_reqs {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.half_open_since = None;
                metrics::record_circuit_state(CircuitState::Closed);
                tracing::info!("Circuit breaker closed (recovered)");
            }
        } else {
            self.trip(&mut inner, Instant::now(), "trial request failed");
        }
    }

    /// Current state without re-evaluating timeouts.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Requests currently admitted and not yet released.
    pub fn concurrent(&self) -> i64 {
        self.concurrent.load(Ordering::SeqCst)
    }

    /// Start a new 1-second request window.
    pub fn reset_window(&self) {
        self.inner.lock().request_count = 0;
    }

    /// Force the circuit closed and zero all live counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.request_count = 0;
        inner.opened_at = None;
        inner.half_open_since = None;
        inner.half_open_reqs = 0;
        inner.half_open_successes = 0;
        inner.generation += 1;
        self.concurrent.store(0, Ordering::SeqCst);
        metrics::record_circuit_state(CircuitState::Closed);
        tracing::warn!("Circuit breaker manually reset to closed state");
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            concurrent: self.concurrent.load(Ordering::SeqCst).max(0) as u64,
            max_concurrent: self.max_concurrent,
            rps_current: inner.request_count,
            max_rps: self.max_requests_per_sec,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_count.load(Ordering::Relaxed),
            success_requests: self.success_count.load(Ordering::Relaxed),
            circuit_openings: self.circuit_openings.load(Ordering::Relaxed),
        }
    }

    /// Spawn the 1-second window reset task.
    pub fn start(self: &Arc<Self>, shutdown: &Shutdown) -> BackgroundTasks {
        let breaker = Arc::clone(self);
        let mut tasks = BackgroundTasks::new();
        tasks.push(spawn_periodic(
            "circuit-window-reset",
            Duration::from_secs(1),
            shutdown,
            move || breaker.reset_window(),
        ));
        tasks
    }

    fn enter_half_open(&self, inner: &mut BreakerState, now: Instant) {
        inner.state = CircuitState::HalfOpen;
        inner.half_open_since = Some(now);
        inner.half_open_reqs = 0;
        inner.half_open_successes = 0;
        inner.batch += 1;
        metrics::record_circuit_state(CircuitState::HalfOpen);
        tracing::info!(batch = inner.batch, "Circuit breaker transitioned to half-open state");
    }

    fn trip(&self, inner: &mut BreakerState, now: Instant, reason: &'static str) {
        if inner.state == CircuitState::Open {
            return;
        }
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.half_open_since = None;
        self.circuit_openings.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_state(CircuitState::Open);
        tracing::warn!(reason, "Circuit breaker opened");
    }

    fn reject(&self, state: CircuitState) -> Result<Admission, CircuitState> {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
        Err(state)
    }
}

/// Snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub concurrent: u64,
    pub max_concurrent: u64,
    pub rps_current: u64,
    pub max_rps: u64,
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub success_requests: u64,
    pub circuit_openings: u64,
}

/// Releases an admission when dropped.
///
/// If the handler panics or the request future is dropped before `finish`,
/// the release is recorded as a failure and the panic keeps unwinding.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    admission: Option<Admission>,
}

impl<'a> InFlight<'a> {
    fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission: Some(admission),
        }
    }

    fn finish(mut self, success: bool) {
        if let Some(admission) = self.admission.take() {
            self.breaker.done(admission, success);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.breaker.done(admission, false);
        }
    }
}

/// Middleware: global admission through the circuit breaker.
pub async fn circuit_breaker_middleware(
    State(breaker): State<Arc<CircuitBreaker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let admission = match breaker.allow() {
        Ok(admission) => admission,
        Err(state) => {
            let rejection = Rejection::Overload { state };
            metrics::record_rejection(rejection.reason());
            return rejection.into_response();
        }
    };

    let guard = InFlight::new(&breaker, admission);
    let response = next.run(request).await;
    guard.finish(!response.status().is_server_error());
    response
}
