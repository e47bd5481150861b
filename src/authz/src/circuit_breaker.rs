use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerSection;
use crate::error::{PipelineError, Result};
use crate::metrics::{category, MetricsRegistry};

/// Circuit breaker states following the classic pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all requests pass through
    Closed,
    /// Failing state - reject all requests immediately
    Open,
    /// Testing recovery - a single probe is in flight
    HalfOpen,
}

impl CircuitState {
    pub fn as_metric_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Time since the last failure before an Open circuit admits a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&CircuitBreakerSection> for CircuitConfig {
    fn from(section: &CircuitBreakerSection) -> Self {
        Self {
            failure_threshold: section.failure_threshold,
            recovery_timeout: section.recovery_timeout(),
        }
    }
}

/// Internal state tracking
#[derive(Debug)]
struct StateData {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    last_state_change: Instant,
    /// Bumped on every transition; admissions carry the value they saw
    generation: u64,
}

impl Default for StateData {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
            last_state_change: Instant::now(),
            generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Totals {
    successes: AtomicU64,
    failures: AtomicU64,
    trips: AtomicU64,
    rejected: AtomicU64,
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// An admitted call and the generation it was admitted under
#[derive(Debug, Clone, Copy)]
struct Ticket {
    admission: Admission,
    generation: u64,
}

/// Circuit breaker guarding one named resource
pub struct CircuitBreaker {
    resource: String,
    config: CircuitConfig,
    state_data: Mutex<StateData>,
    totals: Totals,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker for a named resource
    pub fn new(resource: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            resource: resource.into(),
            config,
            state_data: Mutex::new(StateData::default()),
            totals: Totals::default(),
            metrics: None,
        }
    }

    /// Create a breaker that reports transitions to the metrics registry
    pub fn with_metrics(
        resource: impl Into<String>,
        config: CircuitConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let breaker = Self {
            metrics: Some(metrics),
            ..Self::new(resource, config)
        };
        breaker.publish_state(CircuitState::Closed);
        breaker
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// When the circuit is open the operation is not invoked and
    /// [`PipelineError::CircuitOpen`] is returned.
    pub async fn call<F, T, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(ticket) = self.try_acquire() else {
            self.totals.rejected.fetch_add(1, Ordering::Relaxed);
            self.count("rejected");
            debug!(resource = %self.resource, "Circuit open, rejecting call");
            return Err(PipelineError::CircuitOpen(self.resource.clone()));
        };

        let mut guard = CallGuard {
            breaker: self,
            ticket,
            settled: false,
        };

        let result = f().await;
        match &result {
            Ok(_) => guard.settle(true),
            Err(_) => guard.settle(false),
        }

        result
    }

    /// Decide whether a call may proceed, performing Open -> HalfOpen when due
    fn try_acquire(&self) -> Option<Ticket> {
        let mut state = self.state_data.lock();

        let admission = match state.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open => {
                let recovered = state
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);

                if recovered {
                    self.transition_to_half_open(&mut state);
                    state.probe_in_flight = true;
                    Some(Admission::Probe)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    None
                } else {
                    state.probe_in_flight = true;
                    Some(Admission::Probe)
                }
            }
        }?;

        Some(Ticket {
            admission,
            generation: state.generation,
        })
    }

    /// Apply the outcome of an admitted call
    ///
    /// Only outcomes from the generation they were admitted under move the
    /// state: a Normal call can only count against a Closed circuit and only
    /// the probe can leave HalfOpen. Late results of older calls still count
    /// in the totals.
    fn settle_admitted(&self, ticket: Ticket, success: bool) {
        let mut state = self.state_data.lock();
        if success {
            self.totals.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.totals.failures.fetch_add(1, Ordering::Relaxed);
        }

        if state.generation != ticket.generation {
            debug!(
                resource = %self.resource,
                admission = ?ticket.admission,
                success,
                "Ignoring outcome of a call admitted before the last transition"
            );
            return;
        }

        match (ticket.admission, state.state) {
            (Admission::Normal, CircuitState::Closed) => {
                if success {
                    state.consecutive_failures = 0;
                } else {
                    self.count_closed_failure(&mut state);
                }
            }
            (Admission::Probe, CircuitState::HalfOpen) => {
                if success {
                    self.transition_to_closed(&mut state);
                } else {
                    state.last_failure_at = Some(Instant::now());
                    self.transition_to_open(&mut state);
                }
            }
            (admission, current) => {
                warn!(
                    resource = %self.resource,
                    ?admission,
                    state = ?current,
                    "Outcome does not match the circuit state it was admitted under"
                );
            }
        }
    }

    fn count_closed_failure(&self, state: &mut StateData) {
        state.consecutive_failures += 1;
        state.last_failure_at = Some(Instant::now());

        if state.consecutive_failures >= self.config.failure_threshold {
            self.transition_to_open(state);
        }
    }

    /// Record a successful request observed outside [`call`](Self::call)
    pub fn record_success(&self) {
        let mut state = self.state_data.lock();
        self.totals.successes.fetch_add(1, Ordering::Relaxed);

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.transition_to_closed(&mut state);
            }
            CircuitState::Open => {
                warn!(resource = %self.resource, "Success recorded in Open state");
            }
        }
    }

    /// Record a failed request observed outside [`call`](Self::call)
    pub fn record_failure(&self) {
        let mut state = self.state_data.lock();
        self.totals.failures.fetch_add(1, Ordering::Relaxed);

        match state.state {
            CircuitState::Closed => self.count_closed_failure(&mut state),
            CircuitState::HalfOpen => {
                // Failed probe: back to Open with a fresh recovery window
                state.last_failure_at = Some(Instant::now());
                self.transition_to_open(&mut state);
            }
            CircuitState::Open => {
                state.consecutive_failures += 1;
            }
        }
    }

    /// Get current circuit state
    pub fn get_state(&self) -> CircuitState {
        self.state_data.lock().state
    }

    /// Name of the guarded resource
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Force circuit to open state
    pub fn force_open(&self) {
        let mut state = self.state_data.lock();
        if state.state != CircuitState::Open {
            state.last_failure_at = Some(Instant::now());
            self.transition_to_open(&mut state);
            info!(resource = %self.resource, "Circuit breaker manually opened");
        }
    }

    /// Force circuit to closed state
    pub fn force_close(&self) {
        let mut state = self.state_data.lock();
        if state.state != CircuitState::Closed {
            self.transition_to_closed(&mut state);
            info!(resource = %self.resource, "Circuit breaker manually closed");
        }
    }

    /// Get statistics about the circuit breaker
    pub fn stats(&self) -> CircuitStats {
        let state = self.state_data.lock();
        CircuitStats {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            time_in_current_state: state.last_state_change.elapsed(),
            total_successes: self.totals.successes.load(Ordering::Relaxed),
            total_failures: self.totals.failures.load(Ordering::Relaxed),
            total_trips: self.totals.trips.load(Ordering::Relaxed),
            total_rejected: self.totals.rejected.load(Ordering::Relaxed),
        }
    }

    // State transition helpers
    fn transition_to_open(&self, state: &mut StateData) {
        state.generation = state.generation.wrapping_add(1);
        warn!(
            resource = %self.resource,
            consecutive_failures = state.consecutive_failures,
            "Circuit breaker transitioning to Open"
        );
        state.state = CircuitState::Open;
        state.probe_in_flight = false;
        state.last_state_change = Instant::now();
        self.totals.trips.fetch_add(1, Ordering::Relaxed);
        self.count("opened");
        self.publish_state(CircuitState::Open);
    }

    fn transition_to_half_open(&self, state: &mut StateData) {
        state.generation = state.generation.wrapping_add(1);
        debug!(resource = %self.resource, "Circuit breaker transitioning to HalfOpen");
        state.state = CircuitState::HalfOpen;
        state.probe_in_flight = false;
        state.last_state_change = Instant::now();
        self.count("half_opened");
        self.publish_state(CircuitState::HalfOpen);
    }

    fn transition_to_closed(&self, state: &mut StateData) {
        state.generation = state.generation.wrapping_add(1);
        info!(resource = %self.resource, "Circuit breaker transitioning to Closed");
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.probe_in_flight = false;
        state.last_state_change = Instant::now();
        self.count("closed");
        self.publish_state(CircuitState::Closed);
    }

    fn count(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.increment(category::CIRCUIT_BREAKER, outcome);
        }
    }

    fn publish_state(&self, state: CircuitState) {
        if let Some(metrics) = &self.metrics {
            metrics.set_circuit_state(&self.resource, state.as_metric_value());
        }
    }
}

/// Settles an admitted call exactly once, even if its future is dropped
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Ticket,
    settled: bool,
}

impl CallGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.settle_admitted(self.ticket, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        // Cancelled or panicking calls count as failures
        if !self.settled {
            self.breaker.settle_admitted(self.ticket, false);
        }
    }
}

/// Statistics snapshot for circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub time_in_current_state: Duration,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_trips: u64,
    pub total_rejected: u64,
}

impl CircuitStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            1.0
        } else {
            self.total_successes as f64 / total as f64
        }
    }

    pub fn failure_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }
}

/// One shared breaker per resource name
pub struct CircuitBreakerRegistry {
    config: CircuitConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(config: CircuitConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(config)
        }
    }

    /// Breaker for `resource`, created on first use
    pub fn get(&self, resource: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(resource) {
            return existing.clone();
        }

        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| {
                let breaker = match &self.metrics {
                    Some(metrics) => {
                        CircuitBreaker::with_metrics(resource, self.config.clone(), metrics.clone())
                    }
                    None => CircuitBreaker::new(resource, self.config.clone()),
                };
                Arc::new(breaker)
            })
            .clone()
    }

    /// Stats for every breaker created so far, sorted by resource name
    pub fn all_stats(&self) -> Vec<(String, CircuitStats)> {
        let mut stats: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}
