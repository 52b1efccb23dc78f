//! Streaming segment writer.
//!
//! Records are written as they arrive; nothing is buffered beyond the
//! last key (kept to enforce ascending order). The record count goes in
//! the trailer, so the sink never has to seek.

use std::io::Write;

use crate::error::{MergeError, Result};
use crate::segment::format::{SegmentHeader, SegmentMeta, END_MARKER, HEADER_SIZE, MAX_FIELD_LEN, SEGMENT_MAGIC};

pub struct SegmentWriter<W: Write> {
    writer: W,
    record_count: u64,
    byte_size: u64,
    first_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
}

impl<W: Write> SegmentWriter<W> {
    /// Start a segment: writes the header immediately.
    pub fn new(mut writer: W) -> Result<Self> {
        SegmentHeader::new().write_to(&mut writer)?;
        Ok(Self {
            writer,
            record_count: 0,
            byte_size: HEADER_SIZE as u64,
            first_key: None,
            last_key: None,
        })
    }

    /// Append one pair. Keys must be non-decreasing; equal keys are
    /// allowed (a merge that keeps every duplicate emits them).
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key < last.as_slice() {
                return Err(MergeError::OutOfOrder(format!(
                    "record {} key {:?} sorts before previous key {:?}",
                    self.record_count, key, last
                )));
            }
        }
        let key_len = field_len(key, "key")?;
        let value_len = field_len(value, "value")?;

        self.writer.write_all(&key_len.to_le_bytes())?;
        self.writer.write_all(key)?;
        self.writer.write_all(&value_len.to_le_bytes())?;
        self.writer.write_all(value)?;

        self.byte_size += 8 + key.len() as u64 + value.len() as u64;
        self.record_count += 1;
        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }
        match &mut self.last_key {
            Some(last) => {
                last.clear();
                last.extend_from_slice(key);
            }
            None => self.last_key = Some(key.to_vec()),
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Write the trailer and flush. Consumes self.
    pub fn finish(mut self) -> Result<SegmentMeta> {
        self.writer.write_all(&END_MARKER.to_le_bytes())?;
        self.writer.write_all(&self.record_count.to_le_bytes())?;
        self.writer.write_all(&SEGMENT_MAGIC)?;
        self.writer.flush()?;
        self.byte_size += 16;

        Ok(SegmentMeta {
            record_count: self.record_count,
            byte_size: self.byte_size,
            first_key: self.first_key,
            last_key: self.last_key,
        })
    }
}

fn field_len(bytes: &[u8], what: &str) -> Result<u32> {
    match u32::try_from(bytes.len()) {
        Ok(len) if len <= MAX_FIELD_LEN => Ok(len),
        _ => Err(MergeError::InvalidFormat(format!(
            "{what} of {} bytes exceeds limit of {MAX_FIELD_LEN}",
            bytes.len()
        ))),
    }
}
