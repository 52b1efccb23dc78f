//! Segment format types and constants.
//!
//! ```text
//! [Header 8 bytes]
//!   0  4  magic: b"KVSG"
//!   4  2  version: u16 = 1
//!   6  2  reserved: 0x0000
//! [Record]*   (ascending key order)
//!   u32 key_len | key bytes | u32 value_len | value bytes
//! [Trailer 16 bytes]
//!   u32 END_MARKER (0xFFFF_FFFF) | u64 record_count | magic
//! ```
//!
//! All integers little-endian. `END_MARKER` can never be a key length
//! because keys are capped at `MAX_FIELD_LEN`.

use std::io::{Read, Write};

use serde::Serialize;

use crate::error::{MergeError, Result};

// ── Constants ──────────────────────────────────────────────────────

pub const SEGMENT_MAGIC: [u8; 4] = *b"KVSG";

pub const FORMAT_VERSION: u16 = 1;

pub const HEADER_SIZE: usize = 8;

/// Key-length slot value that introduces the trailer.
pub const END_MARKER: u32 = u32::MAX;

/// Largest key or value accepted (1 GiB).
pub const MAX_FIELD_LEN: u32 = 1 << 30;

// ── Header ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: [u8; 4],
    pub version: u16,
}

impl SegmentHeader {
    pub fn new() -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            version: FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(MergeError::InvalidFormat(format!(
                "Not a segment: expected KVSG, got {:?}",
                self.magic
            )));
        }
        if self.version != FORMAT_VERSION {
            return Err(MergeError::InvalidFormat(format!(
                "Unsupported segment version: {}",
                self.version
            )));
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        read_exact_or_truncated(reader, &mut buf, "header")?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        let header = Self { magic, version };
        header.validate()?;
        Ok(header)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&[0u8; 2])?; // reserved
        Ok(())
    }
}

impl Default for SegmentHeader {
    fn default() -> Self {
        Self::new()
    }
}

// ── Meta ───────────────────────────────────────────────────────────

/// Summary returned by `SegmentWriter::finish`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentMeta {
    pub record_count: u64,
    pub byte_size: u64,
    pub first_key: Option<Vec<u8>>,
    pub last_key: Option<Vec<u8>>,
}

// ── Helpers ────────────────────────────────────────────────────────

/// `read_exact` that reports EOF as a truncated segment.
pub(crate) fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            MergeError::InvalidFormat(format!("Truncated segment while reading {what}"))
        } else {
            MergeError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_write_read() {
        let mut buf = Vec::new();
        SegmentHeader::new().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);
        let parsed = SegmentHeader::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, SegmentHeader::new());
    }

    #[test]
    fn test_header_wrong_magic() {
        let buf = *b"XXXX\x01\x00\x00\x00";
        let err = SegmentHeader::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("Not a segment"));
    }

    #[test]
    fn test_header_wrong_version() {
        let buf = *b"KVSG\x07\x00\x00\x00";
        let err = SegmentHeader::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("Unsupported segment version: 7"));
    }

    #[test]
    fn test_header_too_small() {
        let buf = [b'K', b'V'];
        let err = SegmentHeader::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(err.to_string().contains("Truncated"));
    }
}
