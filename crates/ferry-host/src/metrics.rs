use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Metric key for whole requests driven to completion (or failure).
pub const REQUEST: &str = "request";
/// Metric key for outbound task effects.
pub const TASK: &str = "task";

/// Sink for task-driver runtime metrics, keyed by [`REQUEST`], [`TASK`] or a
/// guest export name.
pub trait DriverMetricsSink: Send + Sync {
    fn record_request(&self, key: &str, duration: Duration);
    fn record_error(&self, key: &str);
    fn record_timeout(&self, key: &str);
    /// A request gave up because the guest never stopped reporting pending tasks.
    fn record_exhausted(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct NoopMetricsSink;

impl DriverMetricsSink for NoopMetricsSink {
    fn record_request(&self, _key: &str, _duration: Duration) {}

    fn record_error(&self, _key: &str) {}

    fn record_timeout(&self, _key: &str) {}

    fn record_exhausted(&self, _key: &str) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestMetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub exhausted_count: u64,
    pub durations: Vec<Duration>,
}

#[derive(Debug, Default)]
pub struct TestMetricsSink {
    inner: Mutex<HashMap<String, TestMetricsSnapshot>>,
}

impl TestMetricsSink {
    pub fn snapshot(&self) -> HashMap<String, TestMetricsSnapshot> {
        self.inner.lock().clone()
    }

    /// Returns a snapshot for `key`, or an empty one if `key` was never recorded.
    pub fn snapshot_for(&self, key: &str) -> TestMetricsSnapshot {
        self.inner.lock().get(key).cloned().unwrap_or_default()
    }

    fn update(&self, key: &str, f: impl FnOnce(&mut TestMetricsSnapshot)) {
        let mut inner = self.inner.lock();
        f(inner.entry(key.to_owned()).or_default());
    }
}

impl DriverMetricsSink for TestMetricsSink {
    fn record_request(&self, key: &str, duration: Duration) {
        self.update(key, |entry| {
            entry.request_count = entry.request_count.saturating_add(1);
            entry.durations.push(duration);
        });
    }

    fn record_error(&self, key: &str) {
        self.update(key, |entry| {
            entry.error_count = entry.error_count.saturating_add(1)
        });
    }

    fn record_timeout(&self, key: &str) {
        self.update(key, |entry| {
            entry.timeout_count = entry.timeout_count.saturating_add(1)
        });
    }

    fn record_exhausted(&self, key: &str) {
        self.update(key, |entry| {
            entry.exhausted_count = entry.exhausted_count.saturating_add(1)
        });
    }
}
