//! Job metrics for shard-merge runs
//!
//! Lightweight, thread-safe counters shared by every task of a job.
//!
//! # Overview
//!
//! Tracks:
//! - Assignments emitted by map tasks (including replicated passes)
//! - Map/reduce task attempts and failed attempts (retries = attempts - tasks)
//! - Merge engine invocations and empty shards written without one
//! - Pairs and bytes written to shard outputs
//!
//! # Design Decisions
//!
//! - **Lock-free**: every counter is an `AtomicU64` with relaxed ordering
//! - **Snapshot for reporting**: `snapshot()` copies counters into a
//!   serializable `MetricsSnapshot`, embedded in the job report

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::job::TaskKind;

/// Thread-safe job counters. Share via `Arc<JobMetrics>`.
#[derive(Debug, Default)]
pub struct JobMetrics {
    assignments_emitted: AtomicU64,

    map_attempts: AtomicU64,
    map_failures: AtomicU64,
    reduce_attempts: AtomicU64,
    reduce_failures: AtomicU64,

    merge_invocations: AtomicU64,
    shards_committed: AtomicU64,
    empty_shards_written: AtomicU64,

    pairs_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assignments(&self, count: u64) {
        self.assignments_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_task_attempt(&self, kind: TaskKind) {
        match kind {
            TaskKind::Map => self.map_attempts.fetch_add(1, Ordering::Relaxed),
            TaskKind::Reduce => self.reduce_attempts.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_task_failure(&self, kind: TaskKind) {
        match kind {
            TaskKind::Map => self.map_failures.fetch_add(1, Ordering::Relaxed),
            TaskKind::Reduce => self.reduce_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_merge_invocation(&self) {
        self.merge_invocations.fetch_add(1, Ordering::Relaxed);
    }

    /// A shard output was committed (`empty` = written without the engine).
    pub fn record_shard_committed(&self, pairs: u64, bytes: u64, empty: bool) {
        self.shards_committed.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_shards_written.fetch_add(1, Ordering::Relaxed);
        }
        self.pairs_written.fetch_add(pairs, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            assignments_emitted: self.assignments_emitted.load(Ordering::Relaxed),
            map_attempts: self.map_attempts.load(Ordering::Relaxed),
            map_failures: self.map_failures.load(Ordering::Relaxed),
            reduce_attempts: self.reduce_attempts.load(Ordering::Relaxed),
            reduce_failures: self.reduce_failures.load(Ordering::Relaxed),
            merge_invocations: self.merge_invocations.load(Ordering::Relaxed),
            shards_committed: self.shards_committed.load(Ordering::Relaxed),
            empty_shards_written: self.empty_shards_written.load(Ordering::Relaxed),
            pairs_written: self.pairs_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `JobMetrics`.
///
/// `pairs_written`/`bytes_written` count committed attempts only; a failed
/// attempt's partial output is discarded and never counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub assignments_emitted: u64,
    pub map_attempts: u64,
    pub map_failures: u64,
    pub reduce_attempts: u64,
    pub reduce_failures: u64,
    pub merge_invocations: u64,
    pub shards_committed: u64,
    pub empty_shards_written: u64,
    pub pairs_written: u64,
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_metrics_zero() {
        assert_eq!(JobMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_task_counters_by_kind() {
        let metrics = JobMetrics::new();
        metrics.record_task_attempt(TaskKind::Map);
        metrics.record_task_attempt(TaskKind::Reduce);
        metrics.record_task_attempt(TaskKind::Reduce);
        metrics.record_task_failure(TaskKind::Reduce);

        let snap = metrics.snapshot();
        assert_eq!(snap.map_attempts, 1);
        assert_eq!(snap.reduce_attempts, 2);
        assert_eq!(snap.reduce_failures, 1);
        assert_eq!(snap.map_failures, 0);
    }

    #[test]
    fn test_shard_commit_counters() {
        let metrics = JobMetrics::new();
        metrics.record_shard_committed(10, 200, false);
        metrics.record_shard_committed(0, 24, true);

        let snap = metrics.snapshot();
        assert_eq!(snap.shards_committed, 2);
        assert_eq!(snap.empty_shards_written, 1);
        assert_eq!(snap.pairs_written, 10);
        assert_eq!(snap.bytes_written, 224);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(JobMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_assignments(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().assignments_emitted, 8000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&JobMetrics::new().snapshot()).unwrap();
        assert!(json.contains("\"merge_invocations\":0"));
    }
}
