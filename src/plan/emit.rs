//! Proportional shard bucketing and the per-work-unit assignment cursor.
//!
//! A producer's list is assumed to be ordered so that a path's relative
//! position approximates its place in the global shard order. The path at
//! index `i` of a list of length `L` goes to `floor(i / L * num_shards)`.
//! Key contents are never inspected.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

/// One routed unit of work: "merge `source_path` into shard `shard_id`".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub shard_id: u32,
    pub source_path: String,
}

/// Shard bucket for position `index` in a list of `len` paths.
///
/// Computed as `index * num_shards / len` in `u128`, which is the exact
/// floor of the real-valued ratio. The result is clamped to
/// `num_shards - 1` so the range invariant holds regardless of arithmetic.
///
/// Returns `None` for an empty list, an index past the end, or zero shards.
#[inline]
pub fn assign_shard(index: usize, len: usize, num_shards: u32) -> Option<u32> {
    if len == 0 || index >= len || num_shards == 0 {
        return None;
    }
    let bucket = (index as u128 * num_shards as u128) / len as u128;
    let bucket = u32::try_from(bucket).unwrap_or(u32::MAX);
    Some(bucket.min(num_shards - 1))
}

// ── Cursor ─────────────────────────────────────────────────────────

/// Lazy walk over a slice of the manifest's flattened `(producer, index)`
/// space, yielding one `ShardAssignment` per visited path.
#[derive(Debug)]
pub struct AssignmentCursor<'a> {
    manifest: &'a Manifest,
    producer: usize,
    index: usize,
    remaining: u64,
    consumed: u64,
    total: u64,
}

impl<'a> AssignmentCursor<'a> {
    /// Cursor over flattened positions `range` (clamped to the manifest).
    pub(crate) fn new(manifest: &'a Manifest, range: Range<u64>) -> Self {
        let all = manifest.total_paths();
        let start = range.start.min(all);
        let end = range.end.clamp(start, all);

        // Seek to the producer holding flattened position `start`.
        let producers = manifest.producers();
        let mut skip = start;
        let mut producer = 0;
        while producer < producers.len() && skip >= producers[producer].len() as u64 {
            skip -= producers[producer].len() as u64;
            producer += 1;
        }

        Self {
            manifest,
            producer,
            index: skip as usize,
            remaining: end - start,
            consumed: 0,
            total: end - start,
        }
    }

    /// Full pass over the manifest.
    pub fn full(manifest: &'a Manifest) -> Self {
        Self::new(manifest, 0..manifest.total_paths())
    }

    /// Fraction of this cursor's assignments already yielded.
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.consumed as f32 / self.total as f32
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Iterator for AssignmentCursor<'_> {
    type Item = ShardAssignment;

    fn next(&mut self) -> Option<ShardAssignment> {
        if self.remaining == 0 {
            return None;
        }
        let producers = self.manifest.producers();
        let num_shards = self.manifest.num_shards();

        while let Some(paths) = producers.get(self.producer) {
            if let Some(shard_id) = assign_shard(self.index, paths.len(), num_shards) {
                let source_path = paths[self.index].clone();
                self.index += 1;
                self.remaining -= 1;
                self.consumed += 1;
                return Some(ShardAssignment { shard_id, source_path });
            }
            if paths.is_empty() {
                tracing::debug!(producer = self.producer, "skipping empty producer list");
            }
            self.producer += 1;
            self.index = 0;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
