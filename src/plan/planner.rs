//! Whole-manifest shard plan.
//!
//! Groups every manifest path under the shard it is assigned to. The job
//! itself never materializes this map (reducers only see their own shard);
//! it exists for inspection (`shardmerge plan`) and for checking that a run
//! covered every path.

use std::collections::BTreeMap;

use crate::manifest::Manifest;
use crate::plan::emit::AssignmentCursor;

pub struct ShardPlanner;

impl ShardPlanner {
    /// Plan a manifest via the same cursor the map tasks use.
    ///
    /// Returns a map: shard_id -> paths assigned to that shard, in manifest
    /// order. Shards that receive nothing are absent.
    pub fn plan_manifest(manifest: &Manifest) -> BTreeMap<u32, Vec<String>> {
        let mut result: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for assignment in AssignmentCursor::full(manifest) {
            result.entry(assignment.shard_id).or_default().push(assignment.source_path);
        }
        result
    }
}
