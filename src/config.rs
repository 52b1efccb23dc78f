//! Job configuration for shard-merge runs.
//!
//! A `JobConfig` is the caller-facing surface: target shard count, the
//! producers' segment-path lists, and execution knobs for the runner.
//! Stored as JSON next to the job (`job.json`) and read once before
//! submission.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, Result};
use crate::merge::DuplicatePolicy;
use crate::plan::SplitMode;

/// Default number of virtual splits (one map task).
pub const DEFAULT_NUM_SPLITS: u32 = 1;

/// Default attempts per task before the job fails.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Persistent job configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobConfig {
    /// Number of target shards.
    pub num_shards: u32,
    /// One ordered list of segment paths per producer.
    pub producers: Vec<Vec<String>>,
    /// Parallelism hint for the assignment phase.
    #[serde(default = "default_num_splits")]
    pub num_splits: u32,
    #[serde(default)]
    pub split_mode: SplitMode,
    /// Directory receiving `shard-NNNNN.seg` outputs.
    pub output_dir: PathBuf,
    /// Root that relative segment paths resolve against.
    #[serde(default)]
    pub fs_root: Option<PathBuf>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Worker threads; `None` = auto-tune from system resources.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Write an empty segment for shards that received no sources.
    #[serde(default = "default_true")]
    pub write_empty_shards: bool,
}

fn default_num_splits() -> u32 {
    DEFAULT_NUM_SPLITS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Config with defaults for everything but the manifest and output dir.
    pub fn new(num_shards: u32, producers: Vec<Vec<String>>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            num_shards,
            producers,
            num_splits: DEFAULT_NUM_SPLITS,
            split_mode: SplitMode::default(),
            output_dir: output_dir.into(),
            fs_root: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            threads: None,
            duplicate_policy: DuplicatePolicy::default(),
            write_empty_shards: true,
        }
    }

    /// Read config from a JSON file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write config as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations that can never run.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(MergeError::Config("num_shards must be > 0".into()));
        }
        if self.num_splits == 0 {
            return Err(MergeError::Config("num_splits must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(MergeError::Config("max_attempts must be > 0".into()));
        }
        if self.threads == Some(0) {
            return Err(MergeError::Config("threads must be > 0 when set".into()));
        }
        Ok(())
    }
}
