//! Prometheus-backed metrics registry for pipeline observability
//!
//! Counters are keyed by a category (`queue`, `authorization`, `callback`,
//! `pipeline`, `audit`, `circuit_breaker`) and an outcome label. Increments go
//! straight to atomic Prometheus counters; only the latency window takes a
//! lock.

use parking_lot::Mutex;
use prometheus::{
    Encoder, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::error::Result;

const NAMESPACE: &str = "voltgate";

/// Default number of latency samples retained
pub const DEFAULT_LATENCY_WINDOW: usize = 1_000;

/// Counter categories
pub mod category {
    pub const QUEUE: &str = "queue";
    pub const AUTHORIZATION: &str = "authorization";
    pub const CALLBACK: &str = "callback";
    pub const PIPELINE: &str = "pipeline";
    pub const AUDIT: &str = "audit";
    pub const CIRCUIT_BREAKER: &str = "circuit_breaker";
}

/// Summary of the authorization latency window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub p95_ms: f64,
}

/// Point-in-time view of every metric
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// category -> outcome -> count
    pub counters: BTreeMap<String, BTreeMap<String, u64>>,
    pub queue_depth: i64,
    pub authorization_latency: LatencySummary,
}

impl MetricsSnapshot {
    /// Read one counter, zero if never incremented
    pub fn counter(&self, category: &str, outcome: &str) -> u64 {
        self.counters
            .get(category)
            .and_then(|outcomes| outcomes.get(outcome))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all outcomes in a category
    pub fn category_total(&self, category: &str) -> u64 {
        self.counters
            .get(category)
            .map(|outcomes| outcomes.values().sum())
            .unwrap_or(0)
    }
}

/// Thread-safe metrics registry shared by every pipeline component
pub struct MetricsRegistry {
    registry: Registry,
    events: IntCounterVec,
    queue_depth: IntGauge,
    circuit_state: GaugeVec,
    latencies: Mutex<VecDeque<f64>>,
    max_samples: usize,
}

impl MetricsRegistry {
    /// Create a registry with the default latency window
    pub fn new() -> Result<Self> {
        Self::with_latency_window(DEFAULT_LATENCY_WINDOW)
    }

    /// Create a registry keeping at most `max_samples` latency samples
    pub fn with_latency_window(max_samples: usize) -> Result<Self> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new("pipeline_events_total", "Pipeline events by category and outcome")
                .namespace(NAMESPACE),
            &["category", "outcome"],
        )?;
        registry.register(Box::new(events.clone()))?;

        let queue_depth = IntGauge::with_opts(
            Opts::new("queue_depth", "Requests currently waiting in the work queue")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let circuit_state = GaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            )
            .namespace(NAMESPACE),
            &["resource"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        Ok(Self {
            registry,
            events,
            queue_depth,
            circuit_state,
            latencies: Mutex::new(VecDeque::with_capacity(max_samples.max(1))),
            max_samples: max_samples.max(1),
        })
    }

    /// Increment a category/outcome counter
    pub fn increment(&self, category: &str, outcome: &str) {
        self.events.with_label_values(&[category, outcome]).inc();
    }

    /// Current value of a category/outcome counter
    pub fn counter(&self, category: &str, outcome: &str) -> u64 {
        self.events.with_label_values(&[category, outcome]).get()
    }

    /// Report the current queue depth
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    /// Report a circuit breaker state as a numeric gauge
    pub fn set_circuit_state(&self, resource: &str, value: f64) {
        self.circuit_state.with_label_values(&[resource]).set(value);
    }

    /// Record one authorization latency sample
    pub fn record_authorization_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latencies.lock();
        if samples.len() == self.max_samples {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    /// Average and 95th percentile over the latency window
    pub fn latency_summary(&self) -> LatencySummary {
        let mut sorted: Vec<f64> = self.latencies.lock().iter().copied().collect();
        if sorted.is_empty() {
            return LatencySummary::default();
        }

        sorted.sort_by(|a, b| a.total_cmp(b));
        let sum: f64 = sorted.iter().sum();

        LatencySummary {
            samples: sorted.len(),
            avg_ms: sum / sorted.len() as f64,
            p95_ms: Self::percentile(&sorted, 0.95),
        }
    }

    /// Snapshot every counter plus gauges and the latency summary
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut counters: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();

        for family in self.registry.gather() {
            if !family.get_name().ends_with("pipeline_events_total") {
                continue;
            }

            for metric in family.get_metric() {
                let mut category = None;
                let mut outcome = None;
                for label in metric.get_label() {
                    match label.get_name() {
                        "category" => category = Some(label.get_value().to_string()),
                        "outcome" => outcome = Some(label.get_value().to_string()),
                        _ => {}
                    }
                }

                if let (Some(category), Some(outcome)) = (category, outcome) {
                    counters
                        .entry(category)
                        .or_default()
                        .insert(outcome, metric.get_counter().get_value() as u64);
                }
            }
        }

        MetricsSnapshot {
            counters,
            queue_depth: self.queue_depth.get(),
            authorization_latency: self.latency_summary(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::PipelineError::Internal(e.to_string()))
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MetricsRegistry::new().unwrap();
        assert_eq!(metrics.counter(category::CALLBACK, "success"), 0);
        assert_eq!(metrics.snapshot().counter(category::QUEUE, "enqueued"), 0);
    }

    #[test]
    fn test_increment_and_snapshot() {
        let metrics = MetricsRegistry::new().unwrap();

        metrics.increment(category::AUTHORIZATION, "allowed");
        metrics.increment(category::AUTHORIZATION, "allowed");
        metrics.increment(category::AUTHORIZATION, "unknown");
        metrics.increment(category::CALLBACK, "http_error");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(category::AUTHORIZATION, "allowed"), 2);
        assert_eq!(snapshot.counter(category::AUTHORIZATION, "unknown"), 1);
        assert_eq!(snapshot.category_total(category::AUTHORIZATION), 3);
        assert_eq!(snapshot.counter(category::CALLBACK, "http_error"), 1);
    }

    #[test]
    fn test_queue_depth_gauge() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.set_queue_depth(42);
        assert_eq!(metrics.queue_depth(), 42);
        assert_eq!(metrics.snapshot().queue_depth, 42);
    }

    #[test]
    fn test_latency_summary() {
        let metrics = MetricsRegistry::new().unwrap();

        for ms in 1..=100 {
            metrics.record_authorization_latency(Duration::from_millis(ms));
        }

        let summary = metrics.latency_summary();
        assert_eq!(summary.samples, 100);
        assert!((summary.avg_ms - 50.5).abs() < 0.5);
        assert!((summary.p95_ms - 96.0).abs() < 1.5);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = MetricsRegistry::with_latency_window(10).unwrap();

        for _ in 0..50 {
            metrics.record_authorization_latency(Duration::from_millis(500));
        }
        for _ in 0..10 {
            metrics.record_authorization_latency(Duration::from_millis(2));
        }

        let summary = metrics.latency_summary();
        assert_eq!(summary.samples, 10);
        assert!((summary.avg_ms - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.increment(category::CALLBACK, "max_retries_exceeded");
        metrics.set_queue_depth(3);

        let text = metrics.export_prometheus().unwrap();
        assert!(text.contains("voltgate_pipeline_events_total"));
        assert!(text.contains("outcome=\"max_retries_exceeded\""));
        assert!(text.contains("voltgate_queue_depth 3"));
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = std::sync::Arc::new(MetricsRegistry::new().unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        metrics.increment(category::PIPELINE, "processed");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.counter(category::PIPELINE, "processed"), 8_000);
    }
}
