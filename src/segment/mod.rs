//! Framed sorted key-value segment container.
//!
//! The smallest container the merge path needs: a header, length-prefixed
//! records in ascending key order, and a trailer carrying the record count.
//! No compression, checksums, or indexes; those belong to the downstream
//! storage format.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{SegmentHeader, SegmentMeta, FORMAT_VERSION, HEADER_SIZE, SEGMENT_MAGIC};
pub use reader::SegmentReader;
pub use writer::SegmentWriter;
