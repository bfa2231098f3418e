//! A k-way merging iterator over internal-key-ordered `(key, value)`
//! streams, shared by range scans (memtable + immutable memtable + one
//! iterator per level) and the compaction engine (one iterator per L0
//! input file, one concatenating iterator per non-zero input level).
//!
//! The merge itself does not deduplicate same-user-key entries or drop
//! tombstones — callers walk the merged stream and apply their own
//! visibility rule (a snapshot sequence number for reads, the smallest
//! live snapshot and base-level check for compaction).

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::internal_key;

/// Error surfaced by a child iterator mid-merge (e.g. a corrupt SSTable
/// block). Child iterators wrap their concrete error type into this via
/// `.map_err(|e| MergeIterError(e.to_string()))`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MergeIterError(pub String);

/// One merged entry or a propagated child error.
pub type MergeItem = Result<(Vec<u8>, Vec<u8>), MergeIterError>;

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    child: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; reverse the comparison so the
        // smallest internal key (by our ascending-internal-key ordering)
        // is always popped first.
        internal_key::compare(&other.key, &self.key)
    }
}

/// Merges any number of internal-key-ordered child iterators into one
/// ascending stream. Equal keys from different children are both emitted,
/// in arbitrary relative order among themselves — callers that need "newest
/// version wins" must additionally track source recency (e.g. memtable
/// before immutable memtable before L0 newest-to-oldest before L1..L6).
pub struct MergingIter<'a> {
    children: Vec<Box<dyn Iterator<Item = MergeItem> + 'a>>,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergingIter<'a> {
    pub fn new(mut children: Vec<Box<dyn Iterator<Item = MergeItem> + 'a>>) -> Result<Self, MergeIterError> {
        let mut heap = BinaryHeap::new();
        for (i, child) in children.iter_mut().enumerate() {
            if let Some(item) = child.next() {
                let (key, value) = item?;
                heap.push(HeapEntry { key, value, child: i });
            }
        }
        Ok(MergingIter { children, heap })
    }
}

impl<'a> Iterator for MergingIter<'a> {
    type Item = MergeItem;

    fn next(&mut self) -> Option<Self::Item> {
        let HeapEntry { key, value, child } = self.heap.pop()?;
        match self.children[child].next() {
            Some(Ok((k, v))) => self.heap.push(HeapEntry { key: k, value: v, child }),
            Some(Err(e)) => return Some(Err(e)),
            None => {}
        }
        Some(Ok((key, value)))
    }
}
