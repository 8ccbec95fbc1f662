//! Pipeline metrics (§6, §4.12 step 5).
//!
//! Grounded on the reference workspace's `OrchestrationMetrics` /
//! `ProgressMonitor`: a counters struct behind a lock, updated
//! incrementally as work completes, with a snapshot method the caller
//! polls. Per-stage latency uses the same rolling-average formula as
//! `castellan-llm`'s `ClientMetrics` (`avg = (avg*(n-1) + new) / n`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Point-in-time snapshot of pipeline counters — the shape
/// `Pipeline::metrics_snapshot()` returns (§6).
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Events read off the merged collector stream.
    pub events_in: u64,
    /// Events successfully appended to the security-event store.
    pub events_persisted: u64,
    /// Events dropped, by reason.
    pub events_dropped: HashMap<String, u64>,
    /// Successful semaphore acquisitions.
    pub semaphore_acquires: u64,
    /// Semaphore acquisitions that timed out.
    pub semaphore_timeouts: u64,
    /// Vector-batch flushes performed.
    pub batch_flushes: u64,
    /// Rolling-average elapsed milliseconds per named stage.
    pub avg_stage_latency_ms: HashMap<String, f64>,
    /// Events processed per second since the pipeline started.
    pub events_per_second: f64,
}

struct Latency {
    avg_ms: f64,
    samples: u64,
}

/// Running counters for one pipeline instance.
pub struct PipelineMetrics {
    events_in: AtomicU64,
    events_persisted: AtomicU64,
    events_dropped: Mutex<HashMap<String, u64>>,
    semaphore_acquires: AtomicU64,
    semaphore_timeouts: AtomicU64,
    stage_latency: Mutex<HashMap<String, Latency>>,
    started_at: Instant,
}

impl PipelineMetrics {
    /// Construct a fresh, zeroed counter set; `started_at` is fixed to
    /// construction time, the denominator for `events_per_second`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_in: AtomicU64::new(0),
            events_persisted: AtomicU64::new(0),
            events_dropped: Mutex::new(HashMap::new()),
            semaphore_acquires: AtomicU64::new(0),
            semaphore_timeouts: AtomicU64::new(0),
            stage_latency: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn record_in(&self) -> u64 {
        self.events_in.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_persisted(&self) {
        self.events_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, reason: &str) {
        let mut dropped = self.events_dropped.lock().expect("events_dropped mutex poisoned");
        *dropped.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_semaphore_acquire(&self) {
        self.semaphore_acquires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_semaphore_timeout(&self) {
        self.semaphore_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage_latency(&self, stage: &str, elapsed: Duration) {
        let mut table = self.stage_latency.lock().expect("stage_latency mutex poisoned");
        let entry = table.entry(stage.to_string()).or_insert(Latency { avg_ms: 0.0, samples: 0 });
        entry.samples += 1;
        let new_ms = elapsed.as_secs_f64() * 1000.0;
        entry.avg_ms = (entry.avg_ms * (entry.samples - 1) as f64 + new_ms) / entry.samples as f64;
    }

    /// Build a point-in-time snapshot. `batch_flushes` is supplied by the
    /// caller since flush counting lives on the batcher, which owns the
    /// only lock that needs to guard it.
    #[must_use]
    pub fn snapshot(&self, batch_flushes: u64) -> MetricsSnapshot {
        let events_in = self.events_in.load(Ordering::Relaxed);
        let elapsed_secs = self.started_at.elapsed().as_secs_f64().max(0.001);
        MetricsSnapshot {
            events_in,
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.lock().expect("events_dropped mutex poisoned").clone(),
            semaphore_acquires: self.semaphore_acquires.load(Ordering::Relaxed),
            semaphore_timeouts: self.semaphore_timeouts.load(Ordering::Relaxed),
            batch_flushes,
            avg_stage_latency_ms: self
                .stage_latency
                .lock()
                .expect("stage_latency mutex poisoned")
                .iter()
                .map(|(k, v)| (k.clone(), v.avg_ms))
                .collect(),
            events_per_second: events_in as f64 / elapsed_secs,
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_counters_accumulate_by_reason() {
        let metrics = PipelineMetrics::new();
        metrics.record_dropped("ignored");
        metrics.record_dropped("ignored");
        metrics.record_dropped("below_threshold");
        let snapshot = metrics.snapshot(0);
        assert_eq!(snapshot.events_dropped["ignored"], 2);
        assert_eq!(snapshot.events_dropped["below_threshold"], 1);
    }

    #[test]
    fn stage_latency_is_a_running_average() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage_latency("stage_a", Duration::from_millis(10));
        metrics.record_stage_latency("stage_a", Duration::from_millis(20));
        let snapshot = metrics.snapshot(0);
        assert!((snapshot.avg_stage_latency_ms["stage_a"] - 15.0).abs() < 0.001);
    }
}
