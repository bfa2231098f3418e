//! Filter block: one Bloom filter per 2 KiB span of data blocks.
//!
//! Matches spec.md's filter-block layout: data-block offsets are bucketed
//! by `offset >> BASE_LG` (`BASE_LG = 11`, i.e. 2 KiB spans), and every
//! bucket that covers at least one data block gets its own serialized
//! Bloom filter. A reader maps a data block's starting offset to its
//! bucket and checks only that bucket's filter before doing an I/O for the
//! block — avoiding the dependency on dense per-block filter storage.

use bloomfilter::Bloom;

/// `log2` of the span size each filter bucket covers (2 KiB).
pub const BASE_LG: u8 = 11;

/// Size in bytes of the span each filter bucket covers.
pub const BASE: u64 = 1 << BASE_LG;

/// False-positive rate targeted when sizing each bucket's Bloom filter.
pub const FALSE_POSITIVE_RATE: f64 = 0.01;

/// Map a data block's file offset to its filter bucket index.
pub fn bucket_for_offset(offset: u64) -> usize {
    (offset >> BASE_LG) as usize
}

/// Accumulates keys per bucket as data blocks are written, then serializes
/// one Bloom filter per bucket that received at least one key.
#[derive(Default)]
pub struct FilterBlockBuilder {
    /// Keys queued for the bucket currently being filled.
    pending_keys: Vec<Vec<u8>>,
    /// Completed, serialized `(bucket_index, filter_bytes)` pairs.
    filters: Vec<(usize, Vec<u8>)>,
    next_bucket: usize,
}

impl FilterBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` belongs to the data block currently being
    /// written, which starts at `block_offset`.
    pub fn add_key(&mut self, block_offset: u64, key: &[u8]) {
        let bucket = bucket_for_offset(block_offset);
        while self.next_bucket < bucket {
            self.flush_pending();
            self.next_bucket += 1;
        }
        self.pending_keys.push(key.to_vec());
    }

    fn flush_pending(&mut self) {
        if !self.pending_keys.is_empty() {
            let filter = build_filter(&self.pending_keys);
            self.filters.push((self.next_bucket, filter));
            self.pending_keys.clear();
        }
    }

    /// Finish and serialize the filter block:
    /// `[u32 bucket_count][(u32 bucket_index, u32 filter_len, filter_bytes)...]`.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush_pending();
        let mut out = Vec::new();
        out.extend_from_slice(&(self.filters.len() as u32).to_le_bytes());
        for (bucket, filter) in &self.filters {
            out.extend_from_slice(&(*bucket as u32).to_le_bytes());
            out.extend_from_slice(&(filter.len() as u32).to_le_bytes());
            out.extend_from_slice(filter);
        }
        out
    }
}

fn build_filter(keys: &[Vec<u8>]) -> Vec<u8> {
    let n = keys.len().max(1);
    let mut bloom: Bloom<Vec<u8>> = Bloom::new_for_fp_rate(n, FALSE_POSITIVE_RATE)
        .unwrap_or_else(|_| Bloom::new_for_fp_rate(1, FALSE_POSITIVE_RATE).expect("trivial bloom sizing"));
    for key in keys {
        bloom.set(key);
    }
    bloom.as_slice().to_vec()
}

/// A parsed filter block: maps bucket index to a deserialized Bloom filter.
pub struct FilterBlock {
    buckets: std::collections::HashMap<usize, Bloom<Vec<u8>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterBlockError {
    #[error("truncated filter block")]
    Truncated,
    #[error("invalid bloom filter bytes: {0}")]
    InvalidFilter(String),
}

impl FilterBlock {
    pub fn parse(data: &[u8]) -> Result<Self, FilterBlockError> {
        if data.len() < 4 {
            return Err(FilterBlockError::Truncated);
        }
        let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let mut offset = 4;
        let mut buckets = std::collections::HashMap::with_capacity(count);
        for _ in 0..count {
            if data.len() < offset + 8 {
                return Err(FilterBlockError::Truncated);
            }
            let bucket = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
            let len = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
            offset += 8;
            if data.len() < offset + len {
                return Err(FilterBlockError::Truncated);
            }
            let bytes = &data[offset..offset + len];
            let bloom = Bloom::from_slice(bytes)
                .map_err(|e| FilterBlockError::InvalidFilter(format!("{e:?}")))?;
            buckets.insert(bucket, bloom);
            offset += len;
        }
        Ok(FilterBlock { buckets })
    }

    /// Returns `false` only when `key` is definitely absent from the data
    /// block starting at `block_offset`; `true` means "maybe present" (or
    /// no filter was recorded for that bucket, which is treated as
    /// "can't rule it out").
    pub fn may_contain(&self, block_offset: u64, key: &[u8]) -> bool {
        match self.buckets.get(&bucket_for_offset(block_offset)) {
            Some(bloom) => bloom.check(key),
            None => true,
        }
    }
}
