//! Virtual split generation.
//!
//! No physical input is split: a work unit is a handle that, when opened,
//! walks the manifest. The split count is a caller-supplied parallelism
//! hint, not derived from data size.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, Result};
use crate::manifest::Manifest;
use crate::plan::emit::AssignmentCursor;

/// How work units divide the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Every unit enumerates the whole manifest. Extra units add duplicate
    /// emission work only; reducers deduplicate paths per shard.
    #[default]
    Replicate,
    /// Unit `k` of `n` enumerates flattened positions `[k*T/n, (k+1)*T/n)`.
    Partition,
}

/// One virtual unit of assignment work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    index: u32,
    /// `None` = whole manifest.
    range: Option<Range<u64>>,
}

impl WorkUnit {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Open the unit's cursor against a worker-local manifest.
    pub fn cursor<'a>(&self, manifest: &'a Manifest) -> AssignmentCursor<'a> {
        match &self.range {
            Some(range) => AssignmentCursor::new(manifest, range.clone()),
            None => AssignmentCursor::full(manifest),
        }
    }
}

/// Produces `num_splits` work units for a manifest.
#[derive(Debug, Clone, Copy)]
pub struct VirtualSplitGenerator {
    num_splits: u32,
    mode: SplitMode,
}

impl VirtualSplitGenerator {
    pub fn new(num_splits: u32, mode: SplitMode) -> Result<Self> {
        if num_splits == 0 {
            return Err(MergeError::Config("num_splits must be > 0".into()));
        }
        Ok(Self { num_splits, mode })
    }

    pub fn num_splits(&self) -> u32 {
        self.num_splits
    }

    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    pub fn generate(&self, manifest: &Manifest) -> Vec<WorkUnit> {
        let n = self.num_splits as u128;
        let total = manifest.total_paths() as u128;
        (0..self.num_splits)
            .map(|index| {
                let range = match self.mode {
                    SplitMode::Replicate => None,
                    SplitMode::Partition => {
                        let k = index as u128;
                        let start = (k * total / n) as u64;
                        let end = ((k + 1) * total / n) as u64;
                        Some(start..end)
                    }
                };
                WorkUnit { index, range }
            })
            .collect()
    }
}
