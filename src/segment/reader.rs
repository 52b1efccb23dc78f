//! Streaming segment reader.
//!
//! Yields pairs one at a time from any `Read`, validating framing, key
//! order, and the trailer's record count. Once an error is yielded the
//! reader is fused.

use std::io::Read;

use crate::error::{MergeError, Result};
use crate::merge::MergedPair;
use crate::segment::format::{read_exact_or_truncated, SegmentHeader, END_MARKER, MAX_FIELD_LEN, SEGMENT_MAGIC};

/// Largest buffer reserved for a field before its bytes arrive.
const FIELD_PREALLOC_LIMIT: usize = 64 * 1024;

pub struct SegmentReader<R: Read> {
    reader: R,
    records_read: u64,
    last_key: Option<Vec<u8>>,
    done: bool,
}

impl<R: Read> SegmentReader<R> {
    /// Open a segment stream; validates the header.
    pub fn new(mut reader: R) -> Result<Self> {
        SegmentHeader::read_from(&mut reader)?;
        Ok(Self {
            reader,
            records_read: 0,
            last_key: None,
            done: false,
        })
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        read_exact_or_truncated(&mut self.reader, &mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_field(&mut self, len: u32, what: &str) -> Result<Vec<u8>> {
        if len > MAX_FIELD_LEN {
            return Err(MergeError::InvalidFormat(format!("{what} length {len} exceeds limit")));
        }
        // Capacity follows the bytes actually read, not the declared length.
        let mut buf = Vec::with_capacity((len as usize).min(FIELD_PREALLOC_LIMIT));
        (&mut self.reader).take(u64::from(len)).read_to_end(&mut buf)?;
        if buf.len() < len as usize {
            return Err(MergeError::InvalidFormat(format!("Truncated segment while reading {what}")));
        }
        Ok(buf)
    }

    fn read_trailer(&mut self) -> Result<()> {
        let mut buf = [0u8; 12];
        read_exact_or_truncated(&mut self.reader, &mut buf, "trailer")?;
        let count = u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default());
        if buf[8..12] != SEGMENT_MAGIC {
            return Err(MergeError::InvalidFormat("Bad trailer magic".into()));
        }
        if count != self.records_read {
            return Err(MergeError::InvalidFormat(format!(
                "Trailer count {count} does not match {} records read",
                self.records_read
            )));
        }
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<MergedPair>> {
        let key_len = self.read_u32("key length")?;
        if key_len == END_MARKER {
            self.read_trailer()?;
            return Ok(None);
        }
        let key = self.read_field(key_len, "key")?;
        let value_len = self.read_u32("value length")?;
        let value = self.read_field(value_len, "value")?;

        if let Some(last) = &self.last_key {
            if key < *last {
                return Err(MergeError::OutOfOrder(format!(
                    "record {} key {:?} sorts before previous key {:?}",
                    self.records_read, key, last
                )));
            }
        }
        self.last_key = Some(key.clone());
        self.records_read += 1;
        Ok(Some(MergedPair { key, value }))
    }
}

impl<R: Read> Iterator for SegmentReader<R> {
    type Item = Result<MergedPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
