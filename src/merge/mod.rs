//! Merge engine contract.
//!
//! The orchestration core only knows this interface: given a shard id and
//! its source paths, produce the shard's pairs in ascending key order as a
//! finite, consume-once sequence. Duplicate-key resolution is the engine's
//! policy. `kway::KWayMergeEngine` is the bundled implementation.

pub mod kway;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::FileSystem;

pub use kway::KWayMergeEngine;

/// One output record, written verbatim to the shard's sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergedPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl MergedPair {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Sorted pair stream for one shard.
pub type MergedPairs = Box<dyn Iterator<Item = Result<MergedPair>> + Send>;

/// Everything the engine needs to merge one shard.
#[derive(Debug, Clone)]
pub struct ShardMergeRequest {
    pub shard_id: u32,
    pub num_shards: u32,
    /// Unique source paths routed to this shard; iteration order is sorted.
    pub source_paths: BTreeSet<String>,
    pub fs: Arc<dyn FileSystem>,
}

pub trait MergeEngine: Send + Sync {
    fn merge(&self, request: ShardMergeRequest) -> Result<MergedPairs>;
}

impl<F> MergeEngine for F
where
    F: Fn(ShardMergeRequest) -> Result<MergedPairs> + Send + Sync,
{
    fn merge(&self, request: ShardMergeRequest) -> Result<MergedPairs> {
        self(request)
    }
}

/// Which record survives when several sources carry the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the record from the source whose path sorts first.
    #[default]
    FirstSource,
    /// Keep the record from the source whose path sorts last.
    LastSource,
    /// Emit every record, grouped by key in source order.
    KeepAll,
}
