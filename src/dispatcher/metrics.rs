use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct DispatcherMetrics {
    enqueued: AtomicU64,
    deduplicated: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    runtime_micros: AtomicU64,
}

impl DispatcherMetrics {
    pub(crate) fn enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn succeeded(&self, runtime: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.add_runtime(runtime);
    }

    pub(crate) fn failed(&self, runtime: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_runtime(runtime);
    }

    pub(crate) fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn add_runtime(&self, runtime: Duration) {
        let micros = u64::try_from(runtime.as_micros()).unwrap_or(u64::MAX);
        self.runtime_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_runtime_secs: self.runtime_micros.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }
}

/// Dispatcher counters for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub deduplicated: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_runtime_secs: f64,
}

impl MetricsSnapshot {
    /// Mean runtime of jobs that ran to completion.
    pub fn avg_runtime_secs(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.total_runtime_secs / finished as f64
        }
    }
}
