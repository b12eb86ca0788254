//! In-process execution metrics.
//!
//! Runners, sessions and endpoints record into one global registry; the CLI
//! logs a snapshot after every execution command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Latency histogram in milliseconds.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 10ms, 50ms, 100ms, 500ms, 1s, 5s, 30s, 1min, 5min, 30min
    buckets: [AtomicU64; 10],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 10] = [
        10, 50, 100, 500, 1_000, 5_000, 30_000, 60_000, 300_000, 1_800_000,
    ];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for pipeline execution.
#[derive(Debug, Default)]
pub struct Metrics {
    // Runners
    pub runners_started: Counter,
    pub runners_succeeded: Counter,
    pub runners_failed: Counter,
    pub active_runners: Gauge,

    // Processor objects
    pub objects_generated: Counter,
    pub objects_saved: Counter,
    pub objects_deleted: Counter,

    // Store
    pub rows_flushed: Counter,
    pub flush_errors: Counter,

    // Alerts
    pub notifications_sent: Counter,
    pub endpoint_errors: Counter,
    pub alerts_registered: Counter,

    // Latency histograms
    pub runner_latency_ms: Histogram,
    pub flush_latency_ms: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            runners_started: self.runners_started.get(),
            runners_succeeded: self.runners_succeeded.get(),
            runners_failed: self.runners_failed.get(),
            active_runners: self.active_runners.get(),
            objects_generated: self.objects_generated.get(),
            objects_saved: self.objects_saved.get(),
            objects_deleted: self.objects_deleted.get(),
            rows_flushed: self.rows_flushed.get(),
            flush_errors: self.flush_errors.get(),
            notifications_sent: self.notifications_sent.get(),
            endpoint_errors: self.endpoint_errors.get(),
            alerts_registered: self.alerts_registered.get(),
            runner_latency_mean_ms: self.runner_latency_ms.mean(),
            flush_latency_mean_ms: self.flush_latency_ms.mean(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub runners_started: u64,
    pub runners_succeeded: u64,
    pub runners_failed: u64,
    pub active_runners: u64,
    pub objects_generated: u64,
    pub objects_saved: u64,
    pub objects_deleted: u64,
    pub rows_flushed: u64,
    pub flush_errors: u64,
    pub notifications_sent: u64,
    pub endpoint_errors: u64,
    pub alerts_registered: u64,
    pub runner_latency_mean_ms: f64,
    pub flush_latency_mean_ms: f64,
}

/// Logs the current snapshot at info level.
pub fn log_snapshot() {
    let s = metrics().snapshot();
    tracing::info!(
        runners_started = s.runners_started,
        runners_succeeded = s.runners_succeeded,
        runners_failed = s.runners_failed,
        objects_generated = s.objects_generated,
        objects_saved = s.objects_saved,
        rows_flushed = s.rows_flushed,
        notifications_sent = s.notifications_sent,
        alerts_registered = s.alerts_registered,
        runner_latency_mean_ms = s.runner_latency_mean_ms,
        "Execution metrics"
    );
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
