//! The in-memory write buffer: a skiplist of internal-key-tagged entries.
//!
//! A [`Memtable`] holds every write accepted since the last flush, ordered
//! by internal key (ascending user key, then descending sequence number).
//! It is filled by the write path one entry at a time via [`Memtable::add`]
//! and, once it reaches `write_buffer_size`, frozen and handed to the
//! background worker for translation into an L0 SSTable — the memtable
//! itself has no notion of a write-ahead log; durability is the write
//! path's responsibility (WAL-append happens before the matching
//! `add` call).
//!
//! # Entry format
//!
//! Each skiplist element is a self-contained byte buffer:
//!
//! ```text
//! [u32 internal_key_len][internal_key bytes][u32 value_len][value bytes]
//! ```
//!
//! `internal_key bytes` is `user_key ‖ tail8` as built by
//! [`crate::internal_key::build`]. The comparator only ever inspects the
//! `internal_key` portion, so a synthetic lookup entry with an empty value
//! section compares correctly against real entries.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use tracing::trace;

use crate::internal_key::{self, ValueType};
use crate::skiplist::Skiplist;

/// Outcome of a point lookup in a single memtable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemtableLookup {
    /// A live value was found at or below the requested sequence number.
    Found(Vec<u8>),
    /// The most recent version at or below the requested sequence number
    /// is a tombstone — the key is considered deleted at this snapshot.
    Deleted,
    /// No version of this key exists at or below the requested sequence
    /// number in this memtable; the caller should continue searching
    /// older memtables / SSTables.
    NotFound,
}

fn entry_comparator(a: &Vec<u8>, b: &Vec<u8>) -> Ordering {
    let a_ikey = entry_internal_key(a);
    let b_ikey = entry_internal_key(b);
    internal_key::compare(a_ikey, b_ikey)
}

fn entry_internal_key(entry: &[u8]) -> &[u8] {
    let len = u32::from_le_bytes(entry[0..4].try_into().expect("entry header truncated")) as usize;
    &entry[4..4 + len]
}

fn entry_value(entry: &[u8]) -> Option<&[u8]> {
    let ikey_len = u32::from_le_bytes(entry[0..4].try_into().expect("entry header truncated")) as usize;
    let value_offset = 4 + ikey_len;
    let value_len = u32::from_le_bytes(
        entry[value_offset..value_offset + 4]
            .try_into()
            .expect("entry header truncated"),
    ) as usize;
    if value_len == 0 {
        None
    } else {
        Some(&entry[value_offset + 4..value_offset + 4 + value_len])
    }
}

fn build_entry(ikey: &[u8], value: Option<&[u8]>) -> Vec<u8> {
    let value = value.unwrap_or(&[]);
    let mut out = Vec::with_capacity(4 + ikey.len() + 4 + value.len());
    out.extend_from_slice(&(ikey.len() as u32).to_le_bytes());
    out.extend_from_slice(ikey);
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// A synthetic entry (empty value section) used purely for comparator-driven
/// seeks; never inserted into the skiplist.
fn lookup_entry(ikey: &[u8]) -> Vec<u8> {
    build_entry(ikey, None)
}

/// A decoded memtable entry, as yielded by iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemtableEntry {
    /// `user_key ‖ tail8`.
    pub internal_key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// A skiplist-backed in-memory write buffer.
pub struct Memtable {
    list: Skiplist<Vec<u8>>,
    approximate_size: AtomicUsize,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    /// Create an empty memtable.
    pub fn new() -> Self {
        Memtable {
            list: Skiplist::new(entry_comparator),
            approximate_size: AtomicUsize::new(0),
        }
    }

    /// Insert one entry. Must only be called from the single write-path
    /// thread; concurrent `add` calls are not supported (matches the
    /// skiplist's single-writer contract).
    pub fn add(&self, sequence: u64, value_type: ValueType, key: &[u8], value: Option<&[u8]>) {
        let ikey = internal_key::build(key, sequence, value_type);
        let entry = build_entry(&ikey, value);
        self.approximate_size
            .fetch_add(entry.len(), AtomicOrdering::Relaxed);
        self.list.insert(entry);
        trace!(sequence, key_len = key.len(), "memtable entry added");
    }

    /// Look up the most recent version of `key` visible at `sequence`
    /// (i.e. with an internal sequence number `<= sequence`).
    pub fn get(&self, key: &[u8], sequence: u64) -> MemtableLookup {
        let lookup_ikey = internal_key::lookup_key(key, sequence);
        let probe = lookup_entry(&lookup_ikey);
        let Some(found) = self.list.seek(&probe) else {
            return MemtableLookup::NotFound;
        };
        let found_ikey = entry_internal_key(found);
        let Some((found_user_key, found_seq, found_type)) = internal_key::split(found_ikey) else {
            return MemtableLookup::NotFound;
        };
        if found_user_key != key || found_seq > sequence {
            return MemtableLookup::NotFound;
        }
        match found_type {
            ValueType::Value => {
                MemtableLookup::Found(entry_value(found).map(|v| v.to_vec()).unwrap_or_default())
            }
            ValueType::Deletion => MemtableLookup::Deleted,
        }
    }

    /// Approximate memory occupied by entries added so far, used to decide
    /// when to freeze this memtable and start a new one.
    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_size.load(AtomicOrdering::Relaxed)
    }

    /// Number of entries (including multiple versions of the same user
    /// key and tombstones).
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Iterate every entry in internal-key order: ascending user key, then
    /// descending sequence number. Used both for range scans and for
    /// flushing to an L0 SSTable.
    pub fn iter(&self) -> impl Iterator<Item = MemtableEntry> + '_ {
        self.list.iter().map(|entry| MemtableEntry {
            internal_key: entry_internal_key(entry).to_vec(),
            value: entry_value(entry).map(|v| v.to_vec()),
        })
    }

    /// Iterate entries whose user key falls in `[start, end)` (an empty
    /// `end` means unbounded), restricted to versions visible at
    /// `sequence`. Does not collapse multiple versions of the same key —
    /// callers merging with other sources (other memtables, SSTables) are
    /// responsible for keeping only the newest visible version.
    pub fn scan<'a>(
        &'a self,
        start: &[u8],
        end: Option<&[u8]>,
        sequence: u64,
    ) -> impl Iterator<Item = MemtableEntry> + 'a {
        let start_ikey = internal_key::lookup_key(start, internal_key::MAX_SEQUENCE_NUMBER);
        let probe = lookup_entry(&start_ikey);
        let end = end.map(|e| e.to_vec());
        self.list.iter_from(&probe).filter_map(move |entry| {
            let ikey = entry_internal_key(entry);
            let (user_key, seq, _) = internal_key::split(ikey)?;
            if let Some(end) = &end {
                if user_key >= end.as_slice() {
                    return None;
                }
            }
            if seq > sequence {
                return None;
            }
            Some(MemtableEntry {
                internal_key: ikey.to_vec(),
                value: entry_value(entry).map(|v| v.to_vec()),
            })
        })
    }
}
