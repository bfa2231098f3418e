//! Snapshots: a pinned sequence number that bounds how aggressively
//! compaction may drop old versions of a key.
//!
//! A [`Snapshot`] is acquired against the database's current sequence
//! number and held for the lifetime of a long-running read (a full table
//! scan, a backup). While it is alive, compaction must not discard any
//! entry with a sequence number `<= snapshot.sequence()`, even if a newer
//! version of the same key exists — the snapshot's reader may still need
//! to see it.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// The set of currently outstanding snapshots, tracked as a refcounted
/// multiset of sequence numbers (several snapshots may pin the same
/// sequence). Conceptually the doubly-linked list from the classic design;
/// a sorted map gives the same "smallest pinned sequence" query in
/// logarithmic time without manual intrusive-list bookkeeping.
pub struct SnapshotList {
    sequences: Mutex<BTreeMap<u64, usize>>,
}

impl Default for SnapshotList {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotList {
    pub fn new() -> Arc<Self> {
        Arc::new(SnapshotList {
            sequences: Mutex::new(BTreeMap::new()),
        })
    }

    /// Pin `sequence`, returning a guard that unpins it on drop.
    pub fn acquire(self: &Arc<Self>, sequence: u64) -> Snapshot {
        let mut map = self.lock();
        *map.entry(sequence).or_insert(0) += 1;
        drop(map);
        Snapshot {
            list: self.clone(),
            sequence,
        }
    }

    fn release(&self, sequence: u64) {
        let mut map = self.lock();
        if let Some(count) = map.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                map.remove(&sequence);
            }
        }
    }

    /// The smallest pinned sequence number, or `last_sequence` if no
    /// snapshot is outstanding (nothing older than the latest write need
    /// be preserved for readers).
    pub fn smallest(&self, last_sequence: u64) -> u64 {
        self.lock().keys().next().copied().unwrap_or(last_sequence)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, usize>> {
        self.sequences.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A pinned read snapshot. Dropping it unpins the sequence number.
pub struct Snapshot {
    list: Arc<SnapshotList>,
    sequence: u64,
}

impl Snapshot {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}
