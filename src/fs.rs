//! Filesystem seam.
//!
//! Workers obtain one handle per process and pass it through to the merge
//! engine and the output sink. Paths are plain strings so a distributed
//! store can slot in behind the same trait.

use std::fmt::Debug;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::Result;

pub trait FileSystem: Send + Sync + Debug {
    /// Open a file for sequential reading.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Create (or truncate) a file for writing, creating parent dirs.
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Remove a file. Missing files are not an error.
    fn remove(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool;
}

// ── Local filesystem ───────────────────────────────────────────────

/// Local disk, with relative paths resolved against an optional root.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: Some(root.into()) }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        match &self.root {
            Some(root) if p.is_relative() => root.join(p),
            _ => p.to_path_buf(),
        }
    }
}

impl FileSystem for LocalFileSystem {
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(path))?;
        let len = file.metadata()?.len();
        if len == 0 {
            // mmap rejects zero-length files; the segment reader reports truncation.
            return Ok(Box::new(std::io::empty()));
        }
        prefetch_file(&file, len);
        // Committed segments are never modified in place.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Box::new(Cursor::new(mmap)))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(resolved)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let to = self.resolve(to);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.resolve(from), to)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }
}

/// Hint the OS to read the whole file into the page cache. Best-effort.
#[cfg(target_os = "linux")]
fn prefetch_file(file: &File, len: u64) {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, len as libc::off_t, libc::POSIX_FADV_WILLNEED)
    };
    if rc != 0 {
        tracing::debug!("posix_fadvise failed with {}", rc);
    }
}

#[cfg(not(target_os = "linux"))]
fn prefetch_file(_file: &File, _len: u64) {}
