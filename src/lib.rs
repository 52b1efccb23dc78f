//! shardmerge - shard-merge orchestration for sorted key-value segments
//!
//! Many producers each write a list of sorted segment files whose keys are
//! already roughly ordered by shard. A job fans those inputs in: every
//! path is assigned to one target shard by its relative position in its
//! producer's list, records are routed exactly by shard id, and each
//! shard's unique sources are handed once to a merge engine whose sorted
//! output lands in one segment per shard.
//!
//! # Layout
//!
//! - `manifest` / `config`: job inputs, sealed once and broadcast as bytes
//! - `plan`: virtual splits, proportional bucketing, exact routing
//! - `executor` / `merge` / `sink`: the reduce side
//! - `job`: retries and the in-process `LocalJobRunner`
//! - `segment` / `fs`: on-disk container and filesystem seam

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod fs;
pub mod job;
pub mod manifest;
pub mod merge;
pub mod metrics;
pub mod plan;
pub mod resource;
pub mod segment;
pub mod sink;

pub use cancel::CancelToken;
pub use config::JobConfig;
pub use error::{MergeError, Result};
pub use executor::{ShardMergeExecutor, ShardMergeStats};
pub use fs::{FileSystem, LocalFileSystem};
pub use job::{run_job, JobReport, LocalJobRunner, RetryPolicy};
pub use manifest::{Manifest, ManifestPayload, ManifestStore};
pub use merge::{DuplicatePolicy, KWayMergeEngine, MergeEngine, MergedPair, MergedPairs, ShardMergeRequest};
pub use metrics::{JobMetrics, MetricsSnapshot};
pub use plan::{assign_shard, ShardAssignment, ShardPlanner, ShardRouter, SplitMode, VirtualSplitGenerator};
pub use sink::{MemorySinkFactory, SegmentSinkFactory, ShardSink, SinkFactory, SinkOutput};
