//! Shard merge executor.
//!
//! Reduce side of a job: collects the assignments routed to a partition,
//! groups unique source paths per shard, and drives the merge engine once
//! per shard, streaming its pairs into that shard's sink.
//!
//! # Guarantees
//!
//! - The engine sees each shard at most once per attempt, with a
//!   duplicate-free source set, however many times the map side emitted
//!   the same `(shard, path)` record.
//! - Sink output is committed only after the engine's sequence is fully
//!   consumed without error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::{MergeError, Result};
use crate::fs::FileSystem;
use crate::merge::{MergeEngine, ShardMergeRequest};
use crate::metrics::JobMetrics;
use crate::plan::ShardAssignment;
use crate::sink::SinkFactory;

/// Per-shard outcome of a committed merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardMergeStats {
    pub shard_id: u32,
    pub source_count: usize,
    pub pairs_written: u64,
    pub bytes_written: u64,
    /// Attempt number of the reduce task that committed this shard.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

pub struct ShardMergeExecutor {
    num_shards: u32,
    engine: Arc<dyn MergeEngine>,
    fs: Arc<dyn FileSystem>,
    sinks: Arc<dyn SinkFactory>,
    metrics: Arc<JobMetrics>,
    cancel: CancelToken,
}

impl ShardMergeExecutor {
    pub fn new(
        num_shards: u32,
        engine: Arc<dyn MergeEngine>,
        fs: Arc<dyn FileSystem>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            num_shards,
            engine,
            fs,
            sinks,
            metrics: Arc::new(JobMetrics::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Group assignments by shard, dropping duplicate paths.
    pub fn collect_sources<I>(&self, assignments: I) -> Result<BTreeMap<u32, BTreeSet<String>>>
    where
        I: IntoIterator<Item = ShardAssignment>,
    {
        let mut by_shard: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for assignment in assignments {
            if assignment.shard_id >= self.num_shards {
                return Err(MergeError::ShardOutOfRange {
                    shard_id: assignment.shard_id,
                    num_shards: self.num_shards,
                });
            }
            by_shard
                .entry(assignment.shard_id)
                .or_default()
                .insert(assignment.source_path);
        }
        Ok(by_shard)
    }

    /// Merge every shard present in `assignments`, in ascending shard order.
    pub fn run<I>(&self, assignments: I, attempt: u32) -> Result<Vec<ShardMergeStats>>
    where
        I: IntoIterator<Item = ShardAssignment>,
    {
        let grouped = self.collect_sources(assignments)?;
        let mut stats = Vec::with_capacity(grouped.len());
        for (shard_id, sources) in grouped {
            stats.push(self.merge_shard(shard_id, sources, attempt)?);
        }
        Ok(stats)
    }

    /// One engine invocation for `shard_id`, streamed into a fresh sink.
    pub fn merge_shard(&self, shard_id: u32, sources: BTreeSet<String>, attempt: u32) -> Result<ShardMergeStats> {
        if shard_id >= self.num_shards {
            return Err(MergeError::ShardOutOfRange {
                shard_id,
                num_shards: self.num_shards,
            });
        }
        self.cancel.check()?;

        let source_count = sources.len();
        let request = ShardMergeRequest {
            shard_id,
            num_shards: self.num_shards,
            source_paths: sources,
            fs: Arc::clone(&self.fs),
        };

        tracing::debug!(shard_id, source_count, attempt, "invoking merge engine");
        self.metrics.record_merge_invocation();
        let pairs = self.engine.merge(request)?;

        let mut sink = self.sinks.open_shard(shard_id, attempt)?;
        for pair in pairs {
            self.cancel.check()?;
            sink.write_pair(&pair?)?;
        }
        let output = sink.commit()?;
        self.metrics
            .record_shard_committed(output.record_count, output.byte_size, false);

        tracing::info!(
            shard_id,
            sources = source_count,
            pairs = output.record_count,
            "shard merged"
        );
        Ok(ShardMergeStats {
            shard_id,
            source_count,
            pairs_written: output.record_count,
            bytes_written: output.byte_size,
            attempt,
            location: output.location,
        })
    }

    /// Commit an empty output for a shard that received no assignments.
    /// The engine is not invoked.
    pub fn write_empty_shard(&self, shard_id: u32, attempt: u32) -> Result<ShardMergeStats> {
        if shard_id >= self.num_shards {
            return Err(MergeError::ShardOutOfRange {
                shard_id,
                num_shards: self.num_shards,
            });
        }
        self.cancel.check()?;
        let output = self.sinks.open_shard(shard_id, attempt)?.commit()?;
        self.metrics
            .record_shard_committed(output.record_count, output.byte_size, true);
        tracing::debug!(shard_id, "wrote empty shard");
        Ok(ShardMergeStats {
            shard_id,
            source_count: 0,
            pairs_written: 0,
            bytes_written: output.byte_size,
            attempt,
            location: output.location,
        })
    }
}
