//! Host-application metrics collection.
//!
//! [`ComposeMetrics`] is an explicit collector value the host passes to code
//! that records events; nothing in the orchestrator depends on it.
//! [`ComposeMetrics::global`] exists for callers that insist on a
//! process-wide instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

/// Latency samples retained per operation.
const LATENCY_SAMPLE_CAP: usize = 100;

/// Counters and latency samples for compose operations.
#[derive(Debug, Default)]
pub struct ComposeMetrics {
    stacks_active: AtomicI64,
    stacks_total: AtomicU64,
    operations: Mutex<HashMap<String, OperationRecord>>,
}

#[derive(Debug, Default, Clone)]
struct OperationRecord {
    count: u64,
    errors: u64,
    latencies: Vec<Duration>,
}

impl ComposeMetrics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide collector.
    pub fn global() -> &'static ComposeMetrics {
        static GLOBAL: OnceLock<ComposeMetrics> = OnceLock::new();
        GLOBAL.get_or_init(ComposeMetrics::new)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, OperationRecord>> {
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a stack coming up.
    pub fn stack_started(&self) {
        self.stacks_active.fetch_add(1, Ordering::Relaxed);
        self.stacks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a stack going down.
    pub fn stack_stopped(&self) {
        self.stacks_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records a completed operation and its latency.
    pub fn operation(&self, name: &str, elapsed: Duration) {
        let mut records = self.records();
        let record = records.entry(name.to_string()).or_default();
        record.count += 1;
        record.latencies.push(elapsed);
        if record.latencies.len() > LATENCY_SAMPLE_CAP {
            record.latencies.remove(0);
        }
    }

    /// Records a failed operation.
    pub fn operation_error(&self, name: &str) {
        let mut records = self.records();
        records.entry(name.to_string()).or_default().errors += 1;
    }

    /// Returns a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let records = self.records();
        let operations = records
            .iter()
            .map(|(name, record)| {
                let avg_latency = if record.latencies.is_empty() {
                    Duration::ZERO
                } else {
                    record.latencies.iter().sum::<Duration>() / record.latencies.len() as u32
                };
                (
                    name.clone(),
                    OperationStats {
                        count: record.count,
                        errors: record.errors,
                        avg_latency,
                        samples: record.latencies.len(),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            stacks_active: self.stacks_active.load(Ordering::Relaxed),
            stacks_total: self.stacks_total.load(Ordering::Relaxed),
            operations,
        }
    }

    /// Clears all counters and samples.
    pub fn reset(&self) {
        self.stacks_active.store(0, Ordering::Relaxed);
        self.stacks_total.store(0, Ordering::Relaxed);
        self.records().clear();
    }

    /// Renders a minimal Prometheus-style payload.
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let total_ops: u64 = snapshot.operations.values().map(|s| s.count).sum();
        let total_errors: u64 = snapshot.operations.values().map(|s| s.errors).sum();
        format!(
            "# TYPE compose_stacks_active gauge\ncompose_stacks_active {}\n\
             # TYPE compose_stacks_total counter\ncompose_stacks_total {}\n\
             # TYPE compose_operations_total counter\ncompose_operations_total {}\n\
             # TYPE compose_operation_errors_total counter\ncompose_operation_errors_total {}\n",
            snapshot.stacks_active, snapshot.stacks_total, total_ops, total_errors
        )
    }
}

/// A point-in-time view of the collector.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Stacks currently up.
    pub stacks_active: i64,
    /// Stacks started since process start (or last reset).
    pub stacks_total: u64,
    /// Per-operation statistics.
    pub operations: HashMap<String, OperationStats>,
}

/// Statistics for one operation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStats {
    /// Completed operations.
    pub count: u64,
    /// Failed operations.
    pub errors: u64,
    /// Mean latency over the retained samples.
    pub avg_latency: Duration,
    /// Number of retained latency samples.
    pub samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_operations() {
        let metrics = ComposeMetrics::new();
        metrics.stack_started();
        metrics.operation("start", Duration::from_millis(100));
        metrics.operation("start", Duration::from_millis(300));
        metrics.operation_error("stop");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stacks_active, 1);
        assert_eq!(snapshot.stacks_total, 1);

        let start = &snapshot.operations["start"];
        assert_eq!(start.count, 2);
        assert_eq!(start.avg_latency, Duration::from_millis(200));

        let stop = &snapshot.operations["stop"];
        assert_eq!(stop.count, 0);
        assert_eq!(stop.errors, 1);

        metrics.stack_stopped();
        assert_eq!(metrics.snapshot().stacks_active, 0);
    }

    #[test]
    fn latency_samples_are_capped() {
        let metrics = ComposeMetrics::new();
        for _ in 0..(LATENCY_SAMPLE_CAP + 50) {
            metrics.operation("poll", Duration::from_millis(1));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations["poll"].samples, LATENCY_SAMPLE_CAP);
        assert_eq!(
            snapshot.operations["poll"].count,
            (LATENCY_SAMPLE_CAP + 50) as u64
        );
    }

    #[test]
    fn reset_clears_everything() {
        let metrics = ComposeMetrics::new();
        metrics.stack_started();
        metrics.operation("start", Duration::from_secs(1));
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stacks_active, 0);
        assert_eq!(snapshot.stacks_total, 0);
        assert!(snapshot.operations.is_empty());
    }

    #[test]
    fn renders_prometheus_payload() {
        let metrics = ComposeMetrics::new();
        metrics.stack_started();
        metrics.operation("start", Duration::from_secs(1));

        let text = metrics.render();
        assert!(text.contains("compose_stacks_active 1"));
        assert!(text.contains("compose_operations_total 1"));
        assert!(text.contains("# TYPE compose_stacks_total counter"));
    }

    #[test]
    fn global_returns_same_instance() {
        let a = ComposeMetrics::global() as *const ComposeMetrics;
        let b = ComposeMetrics::global() as *const ComposeMetrics;
        assert_eq!(a, b);
    }
}
