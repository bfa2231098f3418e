//! # AeternusDB
//!
//! An embeddable, ordered key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)**, in the LevelDB family: a
//! write-ahead-logged memtable flushes to L0, and leveled compaction keeps
//! L1..L6 sorted and disjoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Engine                              │
//! │  ┌────────────┐   ┌──────────────┐                            │
//! │  │  Active     │   │   Immutable  │     freeze on              │
//! │  │  Memtable   │──►│   Memtable   │     write_buffer_size      │
//! │  │  + WAL      │   │   (≤ 1)      │                            │
//! │  └─────────────┘   └──────┬───────┘                            │
//! │                            │ flush (background worker)          │
//! │                            ▼                                  │
//! │  ┌───────────────────────────────────────────────────────────┐ │
//! │  │  L0 (overlapping) → L1 → L2 → ... → L6 (disjoint)          │ │
//! │  │  opened through the TableCache / BlockCache, rewritten      │ │
//! │  │  one level deeper by leveled compaction as scores cross 1.0│ │
//! │  └───────────────────────────────────────────────────────────┘ │
//! │                                                                │
//! │  VersionSet persists the current file layout (MANIFEST);       │
//! │  SnapshotList pins old sequence numbers so compaction never     │
//! │  drops a version a live reader can still see.                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | The [`Engine`](engine::Engine) driver — open, read, write, scan, snapshot, compact |
//! | [`memtable`] | In-memory, skiplist-backed write buffer over internal keys |
//! | [`wal`] | Generic, CRC-protected, block-framed write-ahead log |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and block indices |
//! | [`version`] | `VersionEdit`/`Version`/`VersionSet` — the persisted on-disk file layout |
//! | [`compaction`] | Leveled compaction: input selection, expansion, merge execution |
//! | [`cache`] | Sharded LRU table cache and block cache |
//! | [`snapshot`] | Reference-counted read snapshots pinning a sequence number |
//! | [`merge_iter`] | K-way merge over internal-key-ordered streams |
//! | [`internal_key`] | `user_key ‖ sequence ‖ type` encoding and ordering |
//! | [`write_batch`] | Atomic multi-entry write group |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Multi-version keys** — every write carries a sequence number; reads
//!   and snapshots resolve to the newest version at or below their own.
//! - **Point and range reads** — `get`/`get_at` for point lookups, `scan`/
//!   `scan_at` for ordered range iteration, both tombstone-aware.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SSTable data blocks, headers, footers) is checksummed.
//! - **Leveled compaction** — L0 through L6, with size-triggered,
//!   seek-triggered, and manual compaction input selection.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aeternusdb::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let engine = Engine::open("/tmp/my_db", config).unwrap();
//!
//! // Write
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Scan
//! engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
//! engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
//! let results = engine.scan(b"a", Some(b"c")).unwrap();
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod cache;
pub mod compaction;
pub mod encoding;
pub mod engine;
pub mod internal_key;
pub mod memtable;
pub mod merge_iter;
pub mod skiplist;
pub mod snapshot;
pub mod sstable;
pub mod version;
pub mod wal;
pub mod write_batch;
