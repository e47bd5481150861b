//! Composite health verdict derived from pipeline metrics

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::config::HealthSection;
use crate::metrics::{category, MetricsRegistry, MetricsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Degraded,
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }

    fn from_ok(ok: bool) -> Self {
        if ok {
            HealthStatus::Up
        } else {
            HealthStatus::Degraded
        }
    }
}

/// Verdict for one component plus the numbers behind it
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub details: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.get(name)
    }
}

const MAX_RATE_SAMPLES: usize = 1_024;

/// Cumulative outcome counters at one evaluation
#[derive(Debug, Clone, Copy, Default)]
struct RateCounters {
    authorizations: u64,
    unknown: u64,
    callback_success: u64,
    callback_failed: u64,
}

impl RateCounters {
    fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        Self {
            authorizations: snapshot.category_total(category::AUTHORIZATION),
            unknown: snapshot.counter(category::AUTHORIZATION, "unknown"),
            callback_success: snapshot.counter(category::CALLBACK, "success"),
            callback_failed: snapshot.counter(category::CALLBACK, "http_error")
                + snapshot.counter(category::CALLBACK, "network_error"),
        }
    }

    fn since(&self, baseline: &RateCounters) -> Self {
        Self {
            authorizations: self.authorizations.saturating_sub(baseline.authorizations),
            unknown: self.unknown.saturating_sub(baseline.unknown),
            callback_success: self.callback_success.saturating_sub(baseline.callback_success),
            callback_failed: self.callback_failed.saturating_sub(baseline.callback_failed),
        }
    }
}

/// Threshold-based health checks over the metrics registry
///
/// Error rates are computed over the outcomes recorded since the oldest
/// evaluation still inside the rate window, so a past outage stops counting
/// once it ages out and a fresh one is not diluted by lifetime totals.
pub struct HealthAggregator {
    thresholds: HealthSection,
    queue_capacity: usize,
    metrics: Arc<MetricsRegistry>,
    samples: Mutex<VecDeque<(Instant, RateCounters)>>,
}

impl HealthAggregator {
    pub fn new(thresholds: HealthSection, queue_capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            thresholds,
            queue_capacity,
            metrics,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Evaluate every component against the current metrics
    pub fn check(&self) -> HealthReport {
        self.evaluate(&self.metrics.snapshot())
    }

    /// Evaluate an already-taken snapshot
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> HealthReport {
        let window = self.windowed_counters(RateCounters::from_snapshot(snapshot));

        let mut components = BTreeMap::new();
        components.insert("queue".to_string(), self.queue_health(snapshot));
        components.insert(
            "authorization".to_string(),
            self.authorization_health(snapshot, &window),
        );
        components.insert("callbacks".to_string(), self.callback_health(snapshot, &window));

        let all_up = components.values().all(|c| c.status.is_up());

        HealthReport {
            status: HealthStatus::from_ok(all_up),
            components,
            checked_at: Utc::now(),
        }
    }

    /// Record `current` and return the outcomes observed within the window
    fn windowed_counters(&self, current: RateCounters) -> RateCounters {
        let now = Instant::now();
        let mut samples = self.samples.lock();

        // Keep the newest sample at or before the window start as the baseline
        if let Some(start) = now.checked_sub(self.thresholds.rate_window()) {
            while samples.len() > 1 && samples[1].0 <= start {
                samples.pop_front();
            }
        }

        let baseline = samples.front().map(|(_, counters)| *counters).unwrap_or_default();

        samples.push_back((now, current));
        if samples.len() > MAX_RATE_SAMPLES {
            samples.pop_front();
        }

        current.since(&baseline)
    }

    fn queue_health(&self, snapshot: &MetricsSnapshot) -> ComponentHealth {
        let depth = snapshot.queue_depth.max(0) as f64;
        let limit = self.queue_capacity as f64 * self.thresholds.queue_degraded_fraction;

        let mut details = BTreeMap::new();
        details.insert("depth".to_string(), json!(snapshot.queue_depth));
        details.insert("capacity".to_string(), json!(self.queue_capacity));
        details.insert("utilization".to_string(), json!(ratio(depth, self.queue_capacity as f64)));
        details.insert(
            "rejected".to_string(),
            json!(snapshot.counter(category::QUEUE, "rejected")),
        );

        ComponentHealth {
            status: HealthStatus::from_ok(depth < limit),
            details,
        }
    }

    fn authorization_health(&self, snapshot: &MetricsSnapshot, window: &RateCounters) -> ComponentHealth {
        let error_rate = ratio(window.unknown as f64, window.authorizations as f64);

        let mut details = BTreeMap::new();
        details.insert("total".to_string(), json!(window.authorizations));
        details.insert("unknown".to_string(), json!(window.unknown));
        details.insert("error_rate".to_string(), json!(error_rate));
        details.insert(
            "window_ms".to_string(),
            json!(self.thresholds.rate_window_ms),
        );
        details.insert(
            "avg_latency_ms".to_string(),
            json!(snapshot.authorization_latency.avg_ms),
        );
        details.insert(
            "p95_latency_ms".to_string(),
            json!(snapshot.authorization_latency.p95_ms),
        );

        ComponentHealth {
            status: HealthStatus::from_ok(error_rate <= self.thresholds.authorization_error_rate),
            details,
        }
    }

    fn callback_health(&self, snapshot: &MetricsSnapshot, window: &RateCounters) -> ComponentHealth {
        let attempts = window.callback_success + window.callback_failed;
        let error_rate = ratio(window.callback_failed as f64, attempts as f64);

        let mut details = BTreeMap::new();
        details.insert("attempts".to_string(), json!(attempts));
        details.insert("failed".to_string(), json!(window.callback_failed));
        details.insert("error_rate".to_string(), json!(error_rate));
        details.insert(
            "max_retries_exceeded".to_string(),
            json!(snapshot.counter(category::CALLBACK, "max_retries_exceeded")),
        );

        ComponentHealth {
            status: HealthStatus::from_ok(error_rate <= self.thresholds.callback_error_rate),
            details,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(capacity: usize) -> (HealthAggregator, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        (
            HealthAggregator::new(HealthSection::default(), capacity, metrics.clone()),
            metrics,
        )
    }

    #[test]
    fn test_idle_pipeline_is_up() {
        let (health, _) = aggregator(100);
        let report = health.check();

        assert_eq!(report.status, HealthStatus::Up);
        assert_eq!(report.components.len(), 3);
        assert!(report.components.values().all(|c| c.status.is_up()));
    }

    #[test]
    fn test_queue_degrades_at_threshold() {
        let (health, metrics) = aggregator(10);

        metrics.set_queue_depth(7);
        assert!(health.check().status.is_up());

        metrics.set_queue_depth(8);
        let report = health.check();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.component("queue").unwrap().status, HealthStatus::Degraded);
        assert_eq!(report.component("queue").unwrap().details["depth"], json!(8));
    }

    #[test]
    fn test_authorization_error_rate() {
        let (health, metrics) = aggregator(10);

        for _ in 0..9 {
            metrics.increment(category::AUTHORIZATION, "allowed");
        }
        metrics.increment(category::AUTHORIZATION, "unknown");
        assert!(health.check().component("authorization").unwrap().status.is_up());

        metrics.increment(category::AUTHORIZATION, "unknown");
        let report = health.check();
        assert_eq!(report.component("authorization").unwrap().status, HealthStatus::Degraded);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_callback_error_rate() {
        let (health, metrics) = aggregator(10);

        for _ in 0..3 {
            metrics.increment(category::CALLBACK, "success");
        }
        metrics.increment(category::CALLBACK, "http_error");
        metrics.increment(category::CALLBACK, "network_error");

        let report = health.check();
        let callbacks = report.component("callbacks").unwrap();
        assert_eq!(callbacks.status, HealthStatus::Degraded);
        assert_eq!(callbacks.details["failed"], json!(2));
    }

    #[test]
    fn test_recent_outage_not_diluted_by_history() {
        let (health, metrics) = aggregator(10);

        for _ in 0..1_000 {
            metrics.increment(category::AUTHORIZATION, "allowed");
        }
        assert!(health.check().component("authorization").unwrap().status.is_up());

        for _ in 0..5 {
            metrics.increment(category::AUTHORIZATION, "unknown");
        }
        let report = health.check();
        let authorization = report.component("authorization").unwrap();
        assert_eq!(authorization.status, HealthStatus::Degraded);
        assert_eq!(authorization.details["total"], json!(5));
        assert_eq!(authorization.details["unknown"], json!(5));
    }

    #[test]
    fn test_failures_age_out_of_window() {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let thresholds = HealthSection {
            rate_window_ms: 20,
            ..HealthSection::default()
        };
        let health = HealthAggregator::new(thresholds, 10, metrics.clone());

        metrics.increment(category::CALLBACK, "network_error");
        metrics.increment(category::CALLBACK, "network_error");
        assert_eq!(
            health.check().component("callbacks").unwrap().status,
            HealthStatus::Degraded
        );

        std::thread::sleep(std::time::Duration::from_millis(40));
        metrics.increment(category::CALLBACK, "success");
        let report = health.check();
        let callbacks = report.component("callbacks").unwrap();
        assert_eq!(callbacks.status, HealthStatus::Up);
        assert_eq!(callbacks.details["failed"], json!(0));

        std::thread::sleep(std::time::Duration::from_millis(40));
        let report = health.check();
        assert!(report.status.is_up());
        assert_eq!(report.component("callbacks").unwrap().details["attempts"], json!(0));
    }

    #[test]
    fn test_report_serializes_uppercase() {
        let (health, _) = aggregator(10);
        let value = serde_json::to_value(health.check()).unwrap();
        assert_eq!(value["status"], "UP");
        assert_eq!(value["components"]["queue"]["status"], "UP");
    }
}
