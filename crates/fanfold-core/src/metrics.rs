//! Process-wide atomic counters for orchestration runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit the current values as one `tracing::info!`
//! event, typically at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    planner_calls: AtomicU64,
    worker_calls: AtomicU64,
    worker_failures: AtomicU64,
    runs_completed: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub planner_calls: u64,
    pub worker_calls: u64,
    pub worker_failures: u64,
    pub runs_completed: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            planner_calls: AtomicU64::new(0),
            worker_calls: AtomicU64::new(0),
            worker_failures: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
        }
    }

    pub fn inc_planner_calls(&self) {
        self.planner_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "planner_calls", "counter incremented");
    }

    pub fn inc_worker_calls(&self) {
        self.worker_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "worker_calls", "counter incremented");
    }

    pub fn inc_worker_failures(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "worker_failures", "counter incremented");
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            planner_calls: self.planner_calls.load(Ordering::Relaxed),
            worker_calls: self.worker_calls.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let snap = self.snapshot();
        tracing::info!(
            metric = "flush",
            planner_calls = snap.planner_calls,
            worker_calls = snap.worker_calls,
            worker_failures = snap.worker_failures,
            runs_completed = snap.runs_completed,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.planner_calls.store(0, Ordering::Relaxed);
        self.worker_calls.store(0, Ordering::Relaxed);
        self.worker_failures.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
    }
}
