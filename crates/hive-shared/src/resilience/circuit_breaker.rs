//! Circuit breaker with the classic three-state transition graph.
//!
//! Closed -> Open after `failure_threshold` consecutive failures.
//! Open -> HalfOpen once `timeout` has elapsed since the trip.
//! HalfOpen -> Closed after `success_threshold` consecutive successes,
//! HalfOpen -> Open on any failure.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit trips open.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub timeout: Duration,
    /// Consecutive half-open successes before closing again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Cumulative counters for observability.
#[derive(Debug, Clone, Default)]
pub struct CircuitMetrics {
    pub success_count: u64,
    pub failure_count: u64,
    pub rejected_count: u64,
    pub total_latency_ms: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_latency_ms: AtomicU64,
    trips: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            trips: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a protected call may proceed right now. An open circuit
    /// flips to half-open once the probe timeout has elapsed.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.timeout {
                    debug!(breaker = %self.name, "circuit half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a successful protected call.
    pub fn record_success(&self, elapsed: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                debug!(breaker = %self.name, "circuit closed");
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
            }
        }
    }

    /// Record a failed protected call.
    pub fn record_failure(&self, elapsed: Duration) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => self.trip(&mut inner),
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut Inner) {
        warn!(
            breaker = %self.name,
            failures = inner.consecutive_failures,
            "circuit opened"
        );
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_successes = 0;
        self.trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Force the circuit open (admin/testing).
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.trip(&mut inner);
    }

    /// Force the circuit closed (admin).
    pub fn force_closed(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.opened_at = None;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn trip_count(&self) -> u32 {
        self.trips.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}
