//! Atomic batched writes.
//!
//! A [`WriteBatch`] collects a sequence of puts and deletes that are
//! applied to the database atomically: every entry in the batch is
//! assigned consecutive sequence numbers starting from the batch's base
//! sequence, written to the WAL as one logical record, and inserted into
//! the memtable as one unit before any other writer can interleave.
//!
//! # Wire format
//!
//! ```text
//! [sequence(8 LE)][count(4 LE)][entry]...
//! entry := [type(1)][key: u32-len-prefixed][value: u32-len-prefixed, only if type == Value]
//! ```

#[cfg(test)]
mod tests;

use crate::encoding::{self, Encode, EncodingError};
use crate::internal_key::ValueType;

const HEADER_SIZE: usize = 8 + 4;

/// One put or delete queued in a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Whether this is a live value or a tombstone.
    pub value_type: ValueType,
    /// The user key.
    pub key: Vec<u8>,
    /// The value, present only for [`ValueType::Value`] entries.
    pub value: Option<Vec<u8>>,
}

/// A buffer of pending writes sharing one base sequence number.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    sequence: u64,
    entries: Vec<BatchEntry>,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    /// Create an empty batch. The base sequence defaults to 0; the write
    /// path assigns the real value via [`WriteBatch::set_sequence`] once a
    /// range of sequence numbers has been reserved.
    pub fn new() -> Self {
        WriteBatch {
            sequence: 0,
            entries: Vec::new(),
        }
    }

    /// Queue a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.push(BatchEntry {
            value_type: ValueType::Value,
            key: key.into(),
            value: Some(value.into()),
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.entries.push(BatchEntry {
            value_type: ValueType::Deletion,
            key: key.into(),
            value: None,
        });
    }

    /// Number of entries queued in this batch.
    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The batch's base sequence number: the first entry is assigned this
    /// sequence, the second `sequence + 1`, and so on.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Set the base sequence number. Called by the write path once a
    /// contiguous range has been reserved from the database's sequence
    /// counter.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Iterate entries in insertion order, alongside each entry's assigned
    /// sequence number.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &BatchEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(move |(i, e)| (self.sequence + i as u64, e))
    }

    /// Merge another batch's entries into this one, renumbering is left to
    /// the caller via [`WriteBatch::set_sequence`] — used by the write
    /// path's group-commit coalescing to fold several queued writers'
    /// batches into a single WAL record and memtable insertion.
    pub fn append(&mut self, other: &WriteBatch) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Approximate encoded size in bytes, used to bound group-commit
    /// coalescing (spec.md's 1 MiB batch cap).
    pub fn approximate_size(&self) -> usize {
        HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|e| 1 + 4 + e.key.len() + e.value.as_ref().map_or(0, |v| 4 + v.len()))
                .sum::<usize>()
    }
}

impl Encode for WriteBatch {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.sequence.encode_to(buf)?;
        self.count().encode_to(buf)?;
        for entry in &self.entries {
            entry.value_type.encode_to(buf)?;
            entry.key.encode_to(buf)?;
            if let Some(value) = &entry.value {
                value.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for WriteBatch {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (sequence, mut offset) = u64::decode_from(buf)?;
        let (count, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        if count > encoding::MAX_VEC_ELEMENTS {
            return Err(EncodingError::LengthOverflow(format!(
                "write batch entry count {count} exceeds MAX_VEC_ELEMENTS"
            )));
        }
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (value_type, n) = ValueType::decode_from(&buf[offset..])?;
            offset += n;
            let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
            offset += n;
            let value = if value_type == ValueType::Value {
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Some(value)
            } else {
                None
            };
            entries.push(BatchEntry {
                value_type,
                key,
                value,
            });
        }
        Ok((WriteBatch { sequence, entries }, offset))
    }
}
