//! Shard output sinks.
//!
//! The executor writes each shard's merged pairs, in the order the engine
//! yields them, to a sink opened for that `(shard, attempt)`. Output is
//! only visible after `commit`; an attempt that fails or is dropped
//! leaves nothing behind, so retries are idempotent.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::fs::FileSystem;
use crate::merge::MergedPair;
use crate::segment::SegmentWriter;

/// Final file name of a shard's output segment.
pub fn shard_file_name(shard_id: u32) -> String {
    format!("shard-{:05}.seg", shard_id)
}

/// What a committed sink produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOutput {
    pub location: Option<String>,
    pub record_count: u64,
    pub byte_size: u64,
}

pub trait ShardSink: Send {
    fn write_pair(&mut self, pair: &MergedPair) -> Result<()>;

    /// Make the output visible. Consumes the sink.
    fn commit(self: Box<Self>) -> Result<SinkOutput>;
}

pub trait SinkFactory: Send + Sync {
    fn open_shard(&self, shard_id: u32, attempt: u32) -> Result<Box<dyn ShardSink>>;
}

// ── Segment files ──────────────────────────────────────────────────

/// Writes `<output_dir>/shard-NNNNN.seg` through a temp file + rename.
#[derive(Debug, Clone)]
pub struct SegmentSinkFactory {
    fs: Arc<dyn FileSystem>,
    output_dir: PathBuf,
}

impl SegmentSinkFactory {
    pub fn new(fs: Arc<dyn FileSystem>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            output_dir: output_dir.into(),
        }
    }

    pub fn shard_path(&self, shard_id: u32) -> String {
        self.output_dir.join(shard_file_name(shard_id)).to_string_lossy().into_owned()
    }

    fn temp_path(&self, shard_id: u32, attempt: u32) -> String {
        let name = format!(".{}.attempt-{}.tmp", shard_file_name(shard_id), attempt);
        self.output_dir.join(name).to_string_lossy().into_owned()
    }
}

impl SinkFactory for SegmentSinkFactory {
    fn open_shard(&self, shard_id: u32, attempt: u32) -> Result<Box<dyn ShardSink>> {
        let temp_path = self.temp_path(shard_id, attempt);
        let writer = SegmentWriter::new(self.fs.create(&temp_path)?)?;
        Ok(Box::new(SegmentSink {
            writer,
            temp: TempFile {
                fs: Arc::clone(&self.fs),
                path: temp_path,
                persisted: false,
            },
            final_path: self.shard_path(shard_id),
        }))
    }
}

struct SegmentSink {
    // Dropped before `temp`, so the handle is closed before removal.
    writer: SegmentWriter<Box<dyn Write + Send>>,
    temp: TempFile,
    final_path: String,
}

impl ShardSink for SegmentSink {
    fn write_pair(&mut self, pair: &MergedPair) -> Result<()> {
        self.writer.add(&pair.key, &pair.value)
    }

    fn commit(self: Box<Self>) -> Result<SinkOutput> {
        let SegmentSink {
            writer,
            temp,
            final_path,
        } = *self;
        let meta = writer.finish()?;
        temp.persist(&final_path)?;
        tracing::debug!(
            path = %final_path,
            records = meta.record_count,
            bytes = meta.byte_size,
            "committed shard segment"
        );
        Ok(SinkOutput {
            location: Some(final_path),
            record_count: meta.record_count,
            byte_size: meta.byte_size,
        })
    }
}

/// An attempt's temp file; removed on drop unless persisted.
struct TempFile {
    fs: Arc<dyn FileSystem>,
    path: String,
    persisted: bool,
}

impl TempFile {
    fn persist(mut self, dest: &str) -> Result<()> {
        self.fs.rename(&self.path, dest)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = self.fs.remove(&self.path) {
            tracing::warn!(path = %self.path, "failed to remove abandoned shard output: {}", e);
        }
    }
}

// ── In-memory ──────────────────────────────────────────────────────

/// Collects committed shard outputs in memory. Cloning shares storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    committed: Arc<Mutex<BTreeMap<u32, Vec<MergedPair>>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed pairs of one shard, if it was committed.
    pub fn shard(&self, shard_id: u32) -> Option<Vec<MergedPair>> {
        self.lock().get(&shard_id).cloned()
    }

    pub fn committed_shards(&self) -> Vec<u32> {
        self.lock().keys().copied().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<u32, Vec<MergedPair>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, Vec<MergedPair>>> {
        self.committed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open_shard(&self, shard_id: u32, _attempt: u32) -> Result<Box<dyn ShardSink>> {
        Ok(Box::new(MemorySink {
            shard_id,
            pairs: Vec::new(),
            bytes: 0,
            committed: Arc::clone(&self.committed),
        }))
    }
}

struct MemorySink {
    shard_id: u32,
    pairs: Vec<MergedPair>,
    bytes: u64,
    committed: Arc<Mutex<BTreeMap<u32, Vec<MergedPair>>>>,
}

impl ShardSink for MemorySink {
    fn write_pair(&mut self, pair: &MergedPair) -> Result<()> {
        self.bytes += (pair.key.len() + pair.value.len()) as u64;
        self.pairs.push(pair.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<SinkOutput> {
        let MemorySink {
            shard_id,
            pairs,
            bytes,
            committed,
        } = *self;
        let record_count = pairs.len() as u64;
        // A later committed attempt replaces an earlier one.
        committed.lock().unwrap_or_else(|e| e.into_inner()).insert(shard_id, pairs);
        Ok(SinkOutput {
            location: None,
            record_count,
            byte_size: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use crate::segment::SegmentReader;

    fn segment_factory(dir: &std::path::Path) -> (Arc<dyn FileSystem>, SegmentSinkFactory) {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let factory = SegmentSinkFactory::new(Arc::clone(&fs), dir.join("out"));
        (fs, factory)
    }

    #[test]
    fn test_shard_file_name_padded() {
        assert_eq!(shard_file_name(0), "shard-00000.seg");
        assert_eq!(shard_file_name(42), "shard-00042.seg");
    }

    #[test]
    fn test_segment_sink_commit_renames() {
        let dir = tempfile::TempDir::new().unwrap();
        let (fs, factory) = segment_factory(dir.path());

        let mut sink = factory.open_shard(3, 1).unwrap();
        sink.write_pair(&MergedPair::new("a", "1")).unwrap();
        sink.write_pair(&MergedPair::new("b", "2")).unwrap();
        let out = sink.commit().unwrap();

        assert_eq!(out.record_count, 2);
        let path = factory.shard_path(3);
        assert_eq!(out.location.as_deref(), Some(path.as_str()));
        assert!(!fs.exists(&factory.temp_path(3, 1)));

        let pairs: Vec<MergedPair> = SegmentReader::new(fs.open(&path).unwrap())
            .unwrap()
            .map(|p| p.unwrap())
            .collect();
        assert_eq!(pairs, vec![MergedPair::new("a", "1"), MergedPair::new("b", "2")]);
    }

    #[test]
    fn test_dropped_sink_leaves_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let (fs, factory) = segment_factory(dir.path());
        {
            let mut sink = factory.open_shard(0, 1).unwrap();
            sink.write_pair(&MergedPair::new("k", "v")).unwrap();
            assert!(fs.exists(&factory.temp_path(0, 1)));
        }
        assert!(!fs.exists(&factory.temp_path(0, 1)));
        assert!(!fs.exists(&factory.shard_path(0)));
    }

    #[test]
    fn test_out_of_order_pair_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_fs, factory) = segment_factory(dir.path());
        let mut sink = factory.open_shard(0, 1).unwrap();
        sink.write_pair(&MergedPair::new("b", "")).unwrap();
        let err = sink.write_pair(&MergedPair::new("a", "")).unwrap_err();
        assert!(matches!(err, crate::error::MergeError::OutOfOrder(_)));
    }

    #[test]
    fn test_failed_commit_removes_temp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let (fs, factory) = segment_factory(dir.path());

        // A non-empty directory at the final path makes the rename fail.
        let blocker = std::path::PathBuf::from(factory.shard_path(2));
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        let mut sink = factory.open_shard(2, 1).unwrap();
        sink.write_pair(&MergedPair::new("a", "1")).unwrap();
        assert!(sink.commit().is_err());
        assert!(!fs.exists(&factory.temp_path(2, 1)));
        assert!(blocker.is_dir());
    }

    #[test]
    fn test_memory_sink_visible_only_after_commit() {
        let factory = MemorySinkFactory::new();
        let mut sink = factory.open_shard(1, 1).unwrap();
        sink.write_pair(&MergedPair::new("x", "y")).unwrap();
        assert!(factory.shard(1).is_none());

        let out = sink.commit().unwrap();
        assert_eq!(out.record_count, 1);
        assert_eq!(out.byte_size, 2);
        assert_eq!(factory.shard(1).unwrap(), vec![MergedPair::new("x", "y")]);
    }

    #[test]
    fn test_memory_sink_retry_replaces() {
        let factory = MemorySinkFactory::new();
        let mut first = factory.open_shard(0, 1).unwrap();
        first.write_pair(&MergedPair::new("old", "")).unwrap();
        first.commit().unwrap();

        let mut second = factory.open_shard(0, 2).unwrap();
        second.write_pair(&MergedPair::new("new", "")).unwrap();
        second.commit().unwrap();

        assert_eq!(factory.shard(0).unwrap(), vec![MergedPair::new("new", "")]);
        assert_eq!(factory.committed_shards(), vec![0]);
    }
}
