//! Bounded-memory k-way merge over sorted segment sources.
//!
//! Holds exactly one pending record per source in a min-heap keyed by
//! `(key, source_index)`. Sources are indexed in sorted path order, so
//! tie-breaking and duplicate resolution are deterministic across runs
//! and retries.
//!
//! Complexity: O(N log k) time, O(k) records of memory, where N is the
//! total record count and k the number of sources.

use std::cmp::Ordering;
use std::collections::binary_heap::PeekMut;
use std::collections::BinaryHeap;
use std::io::Read;

use crate::error::{MergeError, Result};
use crate::merge::{DuplicatePolicy, MergeEngine, MergedPair, MergedPairs, ShardMergeRequest};
use crate::segment::SegmentReader;

type Source = SegmentReader<Box<dyn Read + Send>>;

/// Merge engine reading framed segments through the request's filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct KWayMergeEngine {
    policy: DuplicatePolicy,
}

impl KWayMergeEngine {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }
}

impl MergeEngine for KWayMergeEngine {
    /// Opens every source before returning, so an unreadable or malformed
    /// source fails the call rather than surfacing mid-stream.
    fn merge(&self, request: ShardMergeRequest) -> Result<MergedPairs> {
        let shard_id = request.shard_id;
        let mut sources = Vec::with_capacity(request.source_paths.len());
        for path in &request.source_paths {
            let reader = request
                .fs
                .open(path)
                .and_then(SegmentReader::new)
                .map_err(|e| source_error(shard_id, path, e))?;
            sources.push((path.clone(), reader));
        }
        let merge = KWayMerge::new(shard_id, sources, self.policy)?;
        Ok(Box::new(merge))
    }
}

fn source_error(shard_id: u32, path: &str, err: MergeError) -> MergeError {
    MergeError::Engine {
        shard_id,
        message: format!("{path}: {err}"),
    }
}

// ── Heap entry ─────────────────────────────────────────────────────

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap, we want the smallest (key, source).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

// ── Merge iterator ─────────────────────────────────────────────────

/// Streaming merge state. Fused after the first error.
pub struct KWayMerge {
    shard_id: u32,
    sources: Vec<(String, Source)>,
    heap: BinaryHeap<HeapEntry>,
    policy: DuplicatePolicy,
    failed: bool,
}

impl KWayMerge {
    pub fn new(shard_id: u32, sources: Vec<(String, Source)>, policy: DuplicatePolicy) -> Result<Self> {
        let mut merge = Self {
            shard_id,
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            policy,
            failed: false,
        };
        for source in 0..merge.sources.len() {
            merge.refill(source)?;
        }
        Ok(merge)
    }

    /// Pull the next record of `source` into the heap, if any.
    fn refill(&mut self, source: usize) -> Result<()> {
        let (path, reader) = &mut self.sources[source];
        if let Some(next) = reader.next() {
            let pair = next.map_err(|e| source_error(self.shard_id, path, e))?;
            self.heap.push(HeapEntry {
                key: pair.key,
                value: pair.value,
                source,
            });
        }
        Ok(())
    }

    /// Pop the heap top if it carries `key`, refilling its source.
    fn pop_duplicate(&mut self, key: &[u8]) -> Result<Option<HeapEntry>> {
        let entry = match self.heap.peek_mut() {
            Some(top) if top.key == key => PeekMut::pop(top),
            _ => return Ok(None),
        };
        self.refill(entry.source)?;
        Ok(Some(entry))
    }

    fn step(&mut self) -> Result<Option<MergedPair>> {
        let Some(head) = self.heap.pop() else {
            return Ok(None);
        };
        self.refill(head.source)?;

        let winner = match self.policy {
            DuplicatePolicy::KeepAll => head,
            DuplicatePolicy::FirstSource => {
                while self.pop_duplicate(&head.key)?.is_some() {}
                head
            }
            DuplicatePolicy::LastSource => {
                let mut winner = head;
                loop {
                    let Some(dup) = self.pop_duplicate(&winner.key)? else {
                        break;
                    };
                    winner = dup;
                }
                winner
            }
        };
        Ok(Some(MergedPair {
            key: winner.key,
            value: winner.value,
        }))
    }
}

impl Iterator for KWayMerge {
    type Item = Result<MergedPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
