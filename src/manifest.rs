//! Manifest store: shard count + producer segment lists for one job.
//!
//! The driver configures the store exactly once, then seals it into a
//! `ManifestPayload`. The payload travels with the job configuration and
//! every worker task decodes its own read-only copy; nothing mutates the
//! manifest after submission.

use serde::{Deserialize, Serialize};

use crate::config::JobConfig;
use crate::error::{MergeError, Result};

// ── Manifest ───────────────────────────────────────────────────────

/// Immutable description of one merge job's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    num_shards: u32,
    producers: Vec<Vec<String>>,
}

impl Manifest {
    /// Validate and build a manifest.
    ///
    /// Empty producer lists are allowed (they contribute nothing); empty
    /// path strings are not.
    pub fn new(num_shards: u32, producers: Vec<Vec<String>>) -> Result<Self> {
        if num_shards == 0 {
            return Err(MergeError::Config("num_shards must be > 0".into()));
        }
        for (producer, paths) in producers.iter().enumerate() {
            if let Some(index) = paths.iter().position(|p| p.is_empty()) {
                return Err(MergeError::Config(format!(
                    "producer {producer} has an empty path at index {index}"
                )));
            }
        }
        Ok(Self { num_shards, producers })
    }

    pub fn from_config(config: &JobConfig) -> Result<Self> {
        Self::new(config.num_shards, config.producers.clone())
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn producers(&self) -> &[Vec<String>] {
        &self.producers
    }

    /// Sum of all producer list lengths.
    pub fn total_paths(&self) -> u64 {
        self.producers.iter().map(|p| p.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_paths() == 0
    }

    /// Stable job identifier: blake3 of the canonical payload, first 8 bytes hex.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = bincode::serialize(self)?;
        let hash = blake3::hash(&bytes);
        Ok(hash.as_bytes()[..8].iter().map(|b| format!("{b:02x}")).collect())
    }
}

// ── Payload ────────────────────────────────────────────────────────

/// Serialized manifest broadcast to every worker task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPayload(Vec<u8>);

impl ManifestPayload {
    pub fn encode(manifest: &Manifest) -> Result<Self> {
        Ok(Self(bincode::serialize(manifest)?))
    }

    /// Decode a worker-local copy. Re-validates, since the bytes may have
    /// crossed a process boundary.
    pub fn decode(&self) -> Result<Manifest> {
        let raw: Manifest = bincode::deserialize(&self.0)?;
        Manifest::new(raw.num_shards, raw.producers)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// ── Store ──────────────────────────────────────────────────────────

/// Driver-side holder enforcing configure-once-before-submit.
#[derive(Debug, Default)]
pub struct ManifestStore {
    manifest: Option<Manifest>,
}

impl ManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the job's shard count and producer lists. Callable exactly once.
    pub fn configure(&mut self, num_shards: u32, producers: Vec<Vec<String>>) -> Result<&Manifest> {
        if self.manifest.is_some() {
            return Err(MergeError::AlreadyConfigured);
        }
        let manifest = Manifest::new(num_shards, producers)?;
        Ok(self.manifest.insert(manifest))
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Freeze the manifest into its broadcast form.
    pub fn seal(&self) -> Result<ManifestPayload> {
        let manifest = self.manifest.as_ref().ok_or(MergeError::NotConfigured)?;
        ManifestPayload::encode(manifest)
    }
}
