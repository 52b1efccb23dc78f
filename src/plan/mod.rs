//! Assignment planning for shard-merge jobs.
//!
//! Turns a manifest into `(shard_id, source_path)` records:
//! virtual work units drive cursors over the manifest, each path gets a
//! proportional shard bucket, and the router delivers every record for a
//! shard to the single reduce partition that owns it.

pub mod emit;
pub mod planner;
pub mod router;
pub mod split;

pub use emit::{assign_shard, AssignmentCursor, ShardAssignment};
pub use planner::ShardPlanner;
pub use router::{Partitioner, ShardRouter};
pub use split::{SplitMode, VirtualSplitGenerator, WorkUnit};
