//! Data block encoding: prefix-compressed entries with periodic restart
//! points.
//!
//! Every entry in a data block stores an internal key delta-encoded
//! against the previous key in the block (`shared` bytes reused, `unshared`
//! bytes appended), plus its value. Every `restart_interval` entries, a
//! "restart point" stores the full key with `shared = 0`, so a reader can
//! binary-search restart points before falling back to a linear scan —
//! exactly the scheme spec.md's data-block layout describes.
//!
//! # Entry format
//!
//! ```text
//! [shared(varint)][unshared(varint)][value_len(varint)][key_delta][value]
//! ```
//!
//! # Block trailer
//!
//! ```text
//! [restart_offset_0(u32 LE)]...[restart_offset_{n-1}(u32 LE)][num_restarts(u32 LE)]
//! ```
//!
//! The 5-byte `[type(1)][crc32(4)]` trailer described in spec.md is added
//! by the caller ([`super::builder`]) around the bytes this module produces;
//! [`Block::new`] is given the trailer-stripped bytes.

use std::cmp::Ordering;

use crate::encoding::{decode_varint_u64, encode_varint_u64};

/// Size of the fixed-width restart-offset entries and the trailing count.
const U32_SIZE: usize = 4;

/// Builds one data block, delta-encoding keys against the previous restart
/// and inserting a restart point every `restart_interval` entries.
pub struct BlockBuilder {
    restart_interval: usize,
    buf: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        BlockBuilder {
            restart_interval: restart_interval.max(1),
            buf: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current estimated encoded size (entries + restart trailer), used by
    /// the caller to decide when to cut a new block.
    pub fn current_size_estimate(&self) -> usize {
        self.buf.len() + self.restarts.len() * U32_SIZE + U32_SIZE
    }

    /// Append one entry. `key` must be `>=` every previously added key
    /// (internal-key order).
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        let shared = if self.counter < self.restart_interval {
            shared_prefix_len(&self.last_key, key)
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = &key[shared..];

        encode_varint_u64(shared as u64, &mut self.buf);
        encode_varint_u64(unshared.len() as u64, &mut self.buf);
        encode_varint_u64(value.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(unshared);
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Finalize the block, appending the restart array and count. Returns
    /// the complete trailer-stripped block bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.finished = true;
        for &offset in &self.restarts {
            self.buf.extend_from_slice(&offset.to_le_bytes());
        }
        self.buf
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buf
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let max = a.len().min(b.len());
    let mut i = 0;
    while i < max && a[i] == b[i] {
        i += 1;
    }
    i
}

/// A parsed, read-only data block.
#[derive(Clone)]
pub struct Block {
    data: Vec<u8>,
    restarts_offset: usize,
    num_restarts: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block is too short to contain a restart trailer")]
    Truncated,
    #[error("malformed block entry at offset {0}")]
    Malformed(usize),
}

impl Block {
    /// Parse a trailer-stripped block (the 5-byte `[type][crc32]` wrapper
    /// must already have been removed and verified by the caller).
    pub fn new(data: Vec<u8>) -> Result<Self, BlockError> {
        if data.len() < U32_SIZE {
            return Err(BlockError::Truncated);
        }
        let num_restarts =
            u32::from_le_bytes(data[data.len() - U32_SIZE..].try_into().unwrap()) as usize;
        let restarts_offset = data
            .len()
            .checked_sub(U32_SIZE * (num_restarts + 1))
            .ok_or(BlockError::Truncated)?;
        Ok(Block {
            data,
            restarts_offset,
            num_restarts,
        })
    }

    fn restart_point(&self, index: usize) -> usize {
        let offset = self.restarts_offset + index * U32_SIZE;
        u32::from_le_bytes(self.data[offset..offset + U32_SIZE].try_into().unwrap()) as usize
    }

    /// Decode one entry at byte offset `pos`, returning
    /// `(shared, key_delta, value, next_pos)`.
    fn decode_entry(&self, pos: usize) -> Result<(usize, &[u8], &[u8], usize), BlockError> {
        let buf = &self.data[pos..self.restarts_offset];
        let (shared, n1) = decode_varint_u64(buf).map_err(|_| BlockError::Malformed(pos))?;
        let (unshared, n2) =
            decode_varint_u64(&buf[n1..]).map_err(|_| BlockError::Malformed(pos))?;
        let (value_len, n3) =
            decode_varint_u64(&buf[n1 + n2..]).map_err(|_| BlockError::Malformed(pos))?;
        let header_len = n1 + n2 + n3;
        let key_delta_start = pos + header_len;
        let key_delta_end = key_delta_start + unshared as usize;
        let value_end = key_delta_end + value_len as usize;
        if value_end > self.restarts_offset {
            return Err(BlockError::Malformed(pos));
        }
        Ok((
            shared as usize,
            &self.data[key_delta_start..key_delta_end],
            &self.data[key_delta_end..value_end],
            value_end,
        ))
    }

    /// A forward iterator positioned before the first entry.
    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter {
            block: self,
            pos: 0,
            key: Vec::new(),
            value: &[],
            valid: false,
        }
    }

    /// Binary-search restart points for the first entry `>= target`
    /// (compared with `compare`), then linear-scan from there.
    pub fn seek<'a>(
        &'a self,
        target: &[u8],
        compare: fn(&[u8], &[u8]) -> Ordering,
    ) -> BlockIter<'a> {
        let mut left = 0usize;
        let mut right = self.num_restarts.saturating_sub(1);
        while left < right {
            let mid = left + (right - left + 1) / 2;
            let pos = self.restart_point(mid);
            match self.decode_entry(pos) {
                Ok((_, key_delta, _, _)) => {
                    // Restart-point entries always have shared == 0, so
                    // `key_delta` is the full key.
                    if compare(key_delta, target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                Err(_) => break,
            }
        }

        let mut it = BlockIter {
            block: self,
            pos: self.restart_point(left),
            key: Vec::new(),
            value: &[],
            valid: false,
        };
        it.advance();
        while it.valid && compare(&it.key, target) == Ordering::Less {
            it.advance();
        }
        it
    }
}

/// Forward iterator over a [`Block`]'s entries.
pub struct BlockIter<'a> {
    block: &'a Block,
    pos: usize,
    key: Vec<u8>,
    value: &'a [u8],
    valid: bool,
}

impl<'a> BlockIter<'a> {
    fn advance(&mut self) {
        if self.pos >= self.block.restarts_offset {
            self.valid = false;
            return;
        }
        match self.block.decode_entry(self.pos) {
            Ok((shared, key_delta, value, next_pos)) => {
                self.key.truncate(shared);
                self.key.extend_from_slice(key_delta);
                self.value = value;
                self.pos = next_pos;
                self.valid = true;
            }
            Err(_) => self.valid = false,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        self.value
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.advance();
        if self.valid {
            Some((self.key.clone(), self.value.to_vec()))
        } else {
            None
        }
    }
}
