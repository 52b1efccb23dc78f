//! Exact shard routing.
//!
//! The key space already is the shard-id domain, so routing is the
//! identity on `shard_id`. One reduce partition exists per shard, which
//! means a shard's records are never spread over two workers.

use crate::error::{MergeError, Result};
use crate::plan::emit::ShardAssignment;

/// Framework-side partitioning seam: assignment -> reduce partition.
pub trait Partitioner: Send + Sync {
    fn partition(&self, assignment: &ShardAssignment, num_partitions: usize) -> Result<usize>;
}

/// Routes every assignment to the partition numbered by its shard id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    num_shards: u32,
}

impl ShardRouter {
    pub fn new(num_shards: u32) -> Self {
        Self { num_shards }
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    #[inline]
    pub fn route(&self, assignment: &ShardAssignment) -> u32 {
        assignment.shard_id
    }
}

impl Partitioner for ShardRouter {
    fn partition(&self, assignment: &ShardAssignment, num_partitions: usize) -> Result<usize> {
        let shard_id = self.route(assignment);
        if shard_id >= self.num_shards || shard_id as usize >= num_partitions {
            return Err(MergeError::ShardOutOfRange {
                shard_id,
                num_shards: self.num_shards,
            });
        }
        Ok(shard_id as usize)
    }
}
