//! In-process job host.
//!
//! Runs the two phases of a shard-merge job on one `rayon` pool:
//!
//! 1. **Map**: one task per work unit. Each attempt decodes its own
//!    manifest copy, walks its cursor, and buffers routed assignments per
//!    reduce partition. Only a successful attempt publishes its buffers
//!    to the shuffle queues, so a retried map never double-publishes.
//! 2. **Reduce**: one task per shard id. Each drains its queue and hands
//!    the records to a `ShardMergeExecutor`.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::JobConfig;
use crate::error::{MergeError, Result};
use crate::executor::{ShardMergeExecutor, ShardMergeStats};
use crate::fs::{FileSystem, LocalFileSystem};
use crate::job::task::{run_with_retries, RetryPolicy, TaskId};
use crate::manifest::{Manifest, ManifestPayload, ManifestStore};
use crate::merge::{KWayMergeEngine, MergeEngine};
use crate::metrics::{JobMetrics, MetricsSnapshot};
use crate::plan::{Partitioner, ShardAssignment, ShardRouter, SplitMode, VirtualSplitGenerator, WorkUnit};
use crate::resource::ResourceManager;
use crate::sink::{SegmentSinkFactory, SinkFactory};

type Batch = Vec<ShardAssignment>;

/// Cancellation is polled once per this many emitted assignments.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Summary of a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub num_shards: u32,
    pub num_splits: u32,
    pub split_mode: SplitMode,
    pub assignments_emitted: u64,
    /// One entry per committed shard, ascending by shard id.
    pub shards: Vec<ShardMergeStats>,
    pub metrics: MetricsSnapshot,
    pub duration_ms: u64,
}

pub struct LocalJobRunner {
    threads: usize,
    retry: RetryPolicy,
    write_empty_shards: bool,
    metrics: Arc<JobMetrics>,
    cancel: CancelToken,
}

impl LocalJobRunner {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            retry: RetryPolicy::default(),
            write_empty_shards: true,
            metrics: Arc::new(JobMetrics::new()),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_write_empty_shards(mut self, enabled: bool) -> Self {
        self.write_empty_shards = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn metrics(&self) -> &Arc<JobMetrics> {
        &self.metrics
    }

    /// Run a sealed job to completion.
    pub fn run(
        &self,
        payload: &ManifestPayload,
        splits: &VirtualSplitGenerator,
        engine: Arc<dyn MergeEngine>,
        fs: Arc<dyn FileSystem>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<JobReport> {
        let start = Instant::now();
        let driver_manifest = payload.decode()?;
        let job_id = driver_manifest.fingerprint()?;
        let num_shards = driver_manifest.num_shards();
        let units = splits.generate(&driver_manifest);

        tracing::info!(
            job_id = %job_id,
            num_shards,
            num_splits = splits.num_splits(),
            mode = ?splits.mode(),
            total_paths = driver_manifest.total_paths(),
            threads = self.threads,
            "starting shard-merge job"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("shardmerge-{}", i))
            .build()
            .map_err(|e| MergeError::Config(format!("failed to build worker pool: {e}")))?;

        // One queue per reduce partition; partition == shard id.
        let (senders, receivers): (Vec<Sender<Batch>>, Vec<Receiver<Batch>>) =
            (0..num_shards).map(|_| crossbeam_channel::unbounded()).unzip();
        let router = ShardRouter::new(num_shards);

        let emitted: u64 = pool.install(|| {
            units
                .par_iter()
                .map(|unit| self.map_task(payload, unit, &router, &senders))
                .collect::<Result<Vec<u64>>>()
                .map(|counts| counts.into_iter().sum())
        })?;
        drop(senders);
        tracing::debug!(job_id = %job_id, emitted, "map phase complete");

        let executor = ShardMergeExecutor::new(num_shards, engine, fs, sinks)
            .with_metrics(Arc::clone(&self.metrics))
            .with_cancel(self.cancel.clone());

        let per_partition = pool.install(|| {
            receivers
                .par_iter()
                .enumerate()
                .map(|(partition, rx)| {
                    let records: Batch = rx.try_iter().flatten().collect();
                    self.reduce_task(&executor, partition as u32, &records)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut shards: Vec<ShardMergeStats> = per_partition.into_iter().flatten().collect();
        shards.sort_by_key(|s| s.shard_id);

        let report = JobReport {
            job_id,
            num_shards,
            num_splits: splits.num_splits(),
            split_mode: splits.mode(),
            assignments_emitted: emitted,
            shards,
            metrics: self.metrics.snapshot(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        tracing::info!(
            job_id = %report.job_id,
            shards = report.shards.len(),
            merges = report.metrics.merge_invocations,
            duration_ms = report.duration_ms,
            "shard-merge job finished"
        );
        Ok(report)
    }

    fn map_task(
        &self,
        payload: &ManifestPayload,
        unit: &WorkUnit,
        router: &ShardRouter,
        senders: &[Sender<Batch>],
    ) -> Result<u64> {
        let buckets = run_with_retries(
            TaskId::map(unit.index()),
            self.retry,
            &self.metrics,
            &self.cancel,
            |_attempt| self.map_attempt(payload, unit, router, senders.len()),
        )?;

        // Commit: publish the successful attempt's output.
        let mut emitted = 0u64;
        for (partition, batch) in buckets.into_iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            emitted += batch.len() as u64;
            senders[partition]
                .send(batch)
                .map_err(|e| MergeError::Shuffle(format!("partition {partition}: {e}")))?;
        }
        self.metrics.record_assignments(emitted);
        Ok(emitted)
    }

    fn map_attempt(
        &self,
        payload: &ManifestPayload,
        unit: &WorkUnit,
        router: &ShardRouter,
        num_partitions: usize,
    ) -> Result<Vec<Batch>> {
        let manifest: Manifest = payload.decode()?;
        let mut buckets: Vec<Batch> = vec![Vec::new(); num_partitions];
        for (n, assignment) in unit.cursor(&manifest).enumerate() {
            if n as u64 % CANCEL_CHECK_INTERVAL == 0 {
                self.cancel.check()?;
            }
            let partition = router.partition(&assignment, num_partitions)?;
            buckets[partition].push(assignment);
        }
        Ok(buckets)
    }

    fn reduce_task(
        &self,
        executor: &ShardMergeExecutor,
        partition: u32,
        records: &[ShardAssignment],
    ) -> Result<Vec<ShardMergeStats>> {
        run_with_retries(
            TaskId::reduce(partition),
            self.retry,
            &self.metrics,
            &self.cancel,
            |attempt| {
                let mut stats = executor.run(records.iter().cloned(), attempt)?;
                if stats.is_empty() && self.write_empty_shards {
                    stats.push(executor.write_empty_shard(partition, attempt)?);
                }
                Ok(stats)
            },
        )
    }
}

/// Configure, seal, and run a job described by `config` on local disk
/// with the bundled k-way engine.
pub fn run_job(config: &JobConfig, cancel: CancelToken) -> Result<JobReport> {
    let mut store = ManifestStore::new();
    store.configure(config.num_shards, config.producers.clone())?;
    config.validate()?;
    let payload = store.seal()?;
    let splits = VirtualSplitGenerator::new(config.num_splits, config.split_mode)?;

    let fs: Arc<dyn FileSystem> = match &config.fs_root {
        Some(root) => Arc::new(LocalFileSystem::with_root(root)),
        None => Arc::new(LocalFileSystem::new()),
    };
    let engine: Arc<dyn MergeEngine> = Arc::new(KWayMergeEngine::new(config.duplicate_policy));
    let sinks: Arc<dyn SinkFactory> = Arc::new(SegmentSinkFactory::new(Arc::clone(&fs), &config.output_dir));
    let threads = config
        .threads
        .unwrap_or_else(|| ResourceManager::auto_tune().worker_threads);

    LocalJobRunner::new(threads)
        .with_retry(RetryPolicy::new(config.max_attempts))
        .with_write_empty_shards(config.write_empty_shards)
        .with_cancel(cancel)
        .run(&payload, &splits, engine, fs, sinks)
}
