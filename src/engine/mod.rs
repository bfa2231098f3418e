//! # DB driver
//!
//! Ties the WAL, memtable, SSTable, version, cache, snapshot, and
//! compaction subsystems into the single embeddable handle: [`Engine`].
//!
//! ## Design overview
//!
//! The engine organises data across three layers, queried newest-first:
//!
//! 1. **Active memtable** — an in-memory sorted map backed by a WAL.
//! 2. **Immutable memtable** — a frozen, read-only memtable awaiting flush
//!    to an L0 SSTable. At most one exists at a time.
//! 3. **The current [`Version`]** — L0 (overlapping) through L6
//!    (disjoint, binary-searchable) SSTables, opened and read through the
//!    [`TableCache`].
//!
//! Writes go through the WAL first, then into the active memtable. Once it
//! reaches [`EngineConfig::write_buffer_size`] it is frozen into the
//! immutable slot and a fresh memtable + WAL take over; the background
//! worker flushes the immutable memtable to an L0 SSTable and runs leveled
//! compaction whenever a [`Version`]'s score crosses 1.0.
//!
//! ## Concurrency model
//!
//! One [`Mutex<WriterState>`] serializes control flow: write commit,
//! freezing the active memtable, and installing a flush/compaction result.
//! A single background thread performs the I/O-heavy half of flush and
//! compaction so the calling thread isn't blocked on them except at the
//! write-stall points in §5 (`L0_SLOWDOWN_WRITES_TRIGGER`,
//! `L0_STOP_WRITES_TRIGGER`, or the immutable slot already being full).
//! Reads take a short lock only to clone the `Arc`s for the active/immutable
//! memtable and the current version, then scan lock-free.

#[cfg(test)]
mod tests;

use std::collections::BinaryHeap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::TableCache;
use crate::compaction::{self, CompactionError};
use crate::internal_key::{self, ValueType};
use crate::memtable::{Memtable, MemtableLookup};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::sstable::builder::BuildOptions;
use crate::sstable::{SstError, SstWriter, sst_file_name};
use crate::version::{
    L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, NUM_LEVELS, VersionEdit, VersionError,
    VersionSet,
};
use crate::wal::{Wal, WalError, log_file_name};
use crate::write_batch::WriteBatch;

const LOCK_FILE_NAME: &str = "LOCK";
const LOG_FILE_NAME: &str = "LOG";
const LOG_OLD_FILE_NAME: &str = "LOG.old";

/// Group-commit coalescing cap (§4.12): queued batches are folded into one
/// WAL record up to this many bytes.
pub const MAX_GROUP_COMMIT_BYTES: usize = 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    #[error("{path} is already locked by another instance")]
    LockHeld { path: PathBuf },

    #[error("the database has recorded a background error and cannot accept further writes")]
    BackgroundError,

    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Config
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max active-memtable size (bytes) before it is frozen.
    pub write_buffer_size: usize,
    /// Target output SSTable size for compaction/flush.
    pub max_file_size: u64,
    /// SSTable data block size.
    pub block_size: usize,
    /// SSTable block restart interval.
    pub block_restart_interval: usize,
    /// Number of open `Table` handles the table cache holds.
    pub table_cache_capacity: usize,
    /// Decoded-byte capacity of the block cache.
    pub block_cache_capacity_bytes: usize,
    /// Bootstrap a fresh database if `dbpath` has no `CURRENT` file.
    pub create_if_missing: bool,
    /// Fsync the WAL after every commit.
    pub sync_writes: bool,
    /// A `LOCK` file older than this may be forcibly reclaimed.
    pub lockfile_stale: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            write_buffer_size: 4 * 1024 * 1024,
            max_file_size: 2 * 1024 * 1024,
            block_size: crate::sstable::DEFAULT_BLOCK_SIZE,
            block_restart_interval: crate::sstable::DEFAULT_BLOCK_RESTART_INTERVAL,
            table_cache_capacity: 1000,
            block_cache_capacity_bytes: 8 * 1024 * 1024,
            create_if_missing: true,
            sync_writes: false,
            lockfile_stale: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            block_size: self.block_size,
            block_restart_interval: self.block_restart_interval,
        }
    }
}

/// Snapshot of engine statistics returned by [`Engine::stats`].
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub has_immutable_memtable: bool,
    pub active_memtable_bytes: usize,
    pub files_per_level: Vec<usize>,
    pub bytes_per_level: Vec<u64>,
    pub compaction_score: f64,
    pub compaction_level: usize,
}

// ------------------------------------------------------------------------------------------------
// LOCK file
// ------------------------------------------------------------------------------------------------

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn acquire_lock(dir: &Path, stale: Duration) -> Result<LockGuard, EngineError> {
    let path = dir.join(LOCK_FILE_NAME);
    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => Ok(LockGuard { path }),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            if age.is_some_and(|age| age > stale) {
                warn!(path = %path.display(), "reclaiming stale LOCK file");
                fs::remove_file(&path)?;
                OpenOptions::new().write(true).create_new(true).open(&path)?;
                Ok(LockGuard { path })
            } else {
                Err(EngineError::LockHeld { path })
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn rotate_log(dir: &Path) -> std::io::Result<()> {
    let log_path = dir.join(LOG_FILE_NAME);
    let old_path = dir.join(LOG_OLD_FILE_NAME);
    if log_path.exists() {
        fs::rename(&log_path, &old_path)?;
    }
    File::create(&log_path)?;
    Ok(())
}

fn parse_log_file_number(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(".log")?.parse::<u64>().ok()
}

fn sst_path(dir: &Path, file_number: u64) -> PathBuf {
    dir.join(sst_file_name(file_number))
}

// ------------------------------------------------------------------------------------------------
// Writer state
// ------------------------------------------------------------------------------------------------

struct WriterState {
    active: Arc<Memtable>,
    active_wal: Wal<WriteBatch>,
    log_number: u64,
    immutable: Option<(Arc<Memtable>, u64)>,
    background_error: Option<String>,
    shutting_down: bool,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineState {
    dir: PathBuf,
    config: EngineConfig,
    version_set: VersionSet,
    table_cache: TableCache,
    snapshots: Arc<SnapshotList>,
    writer: Mutex<WriterState>,
    work_available: Condvar,
    wakeup: Mutex<bool>,
    _lock: LockGuard,
}

/// The embeddable LSM-tree database handle.
///
/// Cheaply cloneable — every clone shares the same background worker and
/// on-disk state via an internal `Arc`.
pub struct Engine {
    state: Arc<EngineState>,
    bg_thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Engine {
            state: self.state.clone(),
            bg_thread: self.bg_thread.clone(),
        }
    }
}

impl Engine {
    /// Opens (or creates, if `config.create_if_missing`) the database
    /// rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let lock = acquire_lock(&dir, config.lockfile_stale)?;
        rotate_log(&dir)?;

        let version_set = if crate::version::exists(&dir) {
            VersionSet::recover(&dir)?
        } else if config.create_if_missing {
            VersionSet::create_new(&dir)?
        } else {
            return Err(EngineError::Internal(format!(
                "no database at {} and create_if_missing is false",
                dir.display()
            )));
        };

        let table_cache = TableCache::new(&dir, config.table_cache_capacity, config.block_cache_capacity_bytes);

        let (active, active_wal, log_number, last_sequence) =
            recover_memtable(&dir, &version_set, &table_cache, &config)?;
        version_set.set_last_sequence(last_sequence);

        info!(dir = %dir.display(), log_number, last_sequence, "database opened");

        let state = Arc::new(EngineState {
            dir,
            config,
            version_set,
            table_cache,
            snapshots: SnapshotList::new(),
            writer: Mutex::new(WriterState {
                active: Arc::new(active),
                active_wal,
                log_number,
                immutable: None,
                background_error: None,
                shutting_down: false,
            }),
            work_available: Condvar::new(),
            wakeup: Mutex::new(false),
            _lock: lock,
        });

        let handle = spawn_background_worker(Arc::downgrade(&state));
        let engine = Engine {
            state,
            bg_thread: Arc::new(Mutex::new(Some(handle))),
        };
        engine.notify_background();
        Ok(engine)
    }

    fn notify_background(&self) {
        let mut wakeup = self.state.wakeup.lock().unwrap_or_else(|e| e.into_inner());
        *wakeup = true;
        self.state.work_available.notify_all();
    }

    /// Gracefully shuts down the engine: signals the background worker and
    /// waits for it to exit.
    pub fn close(&self) -> Result<(), EngineError> {
        {
            let mut writer = self.lock_writer()?;
            writer.shutting_down = true;
        }
        self.notify_background();
        if let Some(handle) = self.bg_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, WriterState>, EngineError> {
        Ok(self.state.writer.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn check_background_error(writer: &WriterState) -> Result<(), EngineError> {
        if let Some(reason) = &writer.background_error {
            return Err(EngineError::Internal(reason.clone()));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------------------------

    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<(), EngineError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Commits `batch` atomically: every entry is assigned consecutive
    /// sequence numbers, appended to the WAL as one record, and applied to
    /// the active memtable before any other writer proceeds.
    pub fn write(&self, batch: WriteBatch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let writer = self.lock_writer()?;
        Self::check_background_error(&writer)?;
        let mut writer = self.make_room_for_write(writer)?;

        let base_sequence = self.state.version_set.last_sequence() + 1;
        let mut batch = batch;
        batch.set_sequence(base_sequence);

        if let Err(e) = writer.active_wal.append(&batch) {
            writer.background_error = Some(e.to_string());
            return Err(e.into());
        }

        for (sequence, entry) in batch.iter() {
            writer.active.add(
                sequence,
                entry.value_type,
                &entry.key,
                entry.value.as_deref(),
            );
        }

        let last_sequence = base_sequence + batch.count() as u64 - 1;
        self.state.version_set.set_last_sequence(last_sequence);
        Ok(())
    }

    /// Enforces the §5 write-stall ladder: a 1ms slowdown once L0 crosses
    /// [`L0_SLOWDOWN_WRITES_TRIGGER`], a wait for flush once the active
    /// memtable is full and the immutable slot is occupied, and a wait for
    /// compaction once L0 crosses [`L0_STOP_WRITES_TRIGGER`].
    fn make_room_for_write<'a>(
        &'a self,
        mut writer: std::sync::MutexGuard<'a, WriterState>,
    ) -> Result<std::sync::MutexGuard<'a, WriterState>, EngineError> {
        loop {
            let l0_files = self.state.version_set.current().levels[0].len();
            if l0_files >= L0_STOP_WRITES_TRIGGER {
                debug!(l0_files, "write stalled: waiting for compaction");
                self.notify_background();
                drop(writer);
                std::thread::sleep(Duration::from_millis(1));
                writer = self.lock_writer()?;
                Self::check_background_error(&writer)?;
                continue;
            }
            if writer.active.approximate_memory_usage() >= self.state.config.write_buffer_size {
                if writer.immutable.is_some() {
                    debug!("write stalled: waiting for in-flight flush");
                    drop(writer);
                    std::thread::sleep(Duration::from_millis(1));
                    writer = self.lock_writer()?;
                    Self::check_background_error(&writer)?;
                    continue;
                }
                self.freeze_active(&mut writer)?;
                self.notify_background();
            }
            if l0_files >= L0_SLOWDOWN_WRITES_TRIGGER {
                std::thread::sleep(Duration::from_millis(1));
            }
            return Ok(writer);
        }
    }

    fn freeze_active(&self, writer: &mut WriterState) -> Result<(), EngineError> {
        let new_wal_number = self.state.version_set.new_file_number();
        let new_wal_path = self.state.dir.join(log_file_name(new_wal_number));
        let new_wal = Wal::open_with_number(&new_wal_path, new_wal_number)?;

        let old_active = std::mem::replace(&mut writer.active, Arc::new(Memtable::new()));
        let old_log_number = std::mem::replace(&mut writer.log_number, new_wal_number);
        writer.active_wal = new_wal;
        writer.immutable = Some((old_active, old_log_number));
        Ok(())
    }

    // -------------------------------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------------------------------

    /// Acquire a read snapshot pinned at the current sequence number.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshots.acquire(self.state.version_set.last_sequence())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let sequence = self.state.version_set.last_sequence();
        self.get_at(key, sequence)
    }

    /// Point lookup visible as of `sequence`: active memtable → immutable
    /// memtable → L0 (newest-first, every overlapping file) → L1..L6
    /// (binary search the disjoint level, one file probed per level).
    pub fn get_at(&self, key: &[u8], sequence: u64) -> Result<Option<Vec<u8>>, EngineError> {
        let (active, immutable, version) = {
            let writer = self.lock_writer()?;
            (writer.active.clone(), writer.immutable.clone(), self.state.version_set.current())
        };

        match active.get(key, sequence) {
            MemtableLookup::Found(v) => return Ok(Some(v)),
            MemtableLookup::Deleted => return Ok(None),
            MemtableLookup::NotFound => {}
        }
        if let Some((immutable, _)) = &immutable {
            match immutable.get(key, sequence) {
                MemtableLookup::Found(v) => return Ok(Some(v)),
                MemtableLookup::Deleted => return Ok(None),
                MemtableLookup::NotFound => {}
            }
        }

        let lookup_ikey = internal_key::lookup_key(key, sequence);

        let mut l0_candidates: Vec<_> = version.levels[0]
            .iter()
            .filter(|f| internal_key::user_key(&f.smallest) <= key && key <= internal_key::user_key(&f.largest))
            .cloned()
            .collect();
        l0_candidates.sort_by(|a, b| b.number.cmp(&a.number));

        for f in &l0_candidates {
            if let Some((found_key, value)) = self.state.table_cache.get(f.number, &lookup_ikey)? {
                if let Some((_, _, value_type)) = internal_key::split(&found_key) {
                    return Ok(match value_type {
                        ValueType::Value => Some(value),
                        ValueType::Deletion => None,
                    });
                }
            }
        }

        for level in 1..NUM_LEVELS {
            let Some(file) = version.levels[level]
                .iter()
                .find(|f| internal_key::user_key(&f.smallest) <= key && key <= internal_key::user_key(&f.largest))
            else {
                continue;
            };
            if let Some((found_key, value)) = self.state.table_cache.get(file.number, &lookup_ikey)? {
                if let Some((_, _, value_type)) = internal_key::split(&found_key) {
                    return Ok(match value_type {
                        ValueType::Value => Some(value),
                        ValueType::Deletion => None,
                    });
                }
            }
        }

        Ok(None)
    }

    /// Range scan over `[start, end)` (`end = None` means unbounded), at
    /// the current sequence number, yielding only live `(key, value)`
    /// pairs (tombstones and superseded versions are filtered out).
    pub fn scan(&self, start: &[u8], end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let sequence = self.state.version_set.last_sequence();
        self.scan_at(start, end, sequence)
    }

    pub fn scan_at(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        sequence: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let (active, immutable, version) = {
            let writer = self.lock_writer()?;
            (writer.active.clone(), writer.immutable.clone(), self.state.version_set.current())
        };

        let mut sources: Vec<Vec<(Vec<u8>, Vec<u8>)>> = Vec::new();

        sources.push(
            active
                .scan(start, end, internal_key::MAX_SEQUENCE_NUMBER)
                .map(|e| (e.internal_key, e.value.unwrap_or_default()))
                .collect(),
        );
        if let Some((immutable, _)) = &immutable {
            sources.push(
                immutable
                    .scan(start, end, internal_key::MAX_SEQUENCE_NUMBER)
                    .map(|e| (e.internal_key, e.value.unwrap_or_default()))
                    .collect(),
            );
        }

        let start_ikey = internal_key::lookup_key(start, internal_key::MAX_SEQUENCE_NUMBER);
        for f in version.overlapping_inputs(0, start, end) {
            sources.push(self.collect_file_range(f.number, &start_ikey, end)?);
        }
        for level in 1..NUM_LEVELS {
            let mut level_entries = Vec::new();
            for f in version.overlapping_inputs(level, start, end) {
                level_entries.extend(self.collect_file_range(f.number, &start_ikey, end)?);
            }
            if !level_entries.is_empty() {
                sources.push(level_entries);
            }
        }

        Ok(merge_visible(sources, sequence))
    }

    fn collect_file_range(
        &self,
        file_number: u64,
        start_ikey: &[u8],
        end: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let mut out = Vec::new();
        for item in self.state.table_cache.iter_from(file_number, start_ikey)? {
            let (ikey, value) = item?;
            if let Some(end) = end {
                if internal_key::user_key(&ikey) >= end {
                    break;
                }
            }
            out.push((ikey, value));
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------------------------
    // Stats / manual compaction
    // -------------------------------------------------------------------------------------------

    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let writer = self.lock_writer()?;
        let version = self.state.version_set.current();
        Ok(EngineStats {
            has_immutable_memtable: writer.immutable.is_some(),
            active_memtable_bytes: writer.active.approximate_memory_usage(),
            files_per_level: version.levels.iter().map(|l| l.len()).collect(),
            bytes_per_level: version
                .levels
                .iter()
                .map(|l| l.iter().map(|f| f.file_size).sum())
                .collect(),
            compaction_score: version.compaction_score,
            compaction_level: version.compaction_level,
        })
    }

    /// Forces a single round of size-triggered compaction, if one is due.
    /// Mainly useful for tests; the background worker already does this.
    pub fn run_compaction_once(&self) -> Result<bool, EngineError> {
        run_one_compaction_round(&self.state)
    }
}

// ------------------------------------------------------------------------------------------------
// Recovery
// ------------------------------------------------------------------------------------------------

fn discover_log_files(dir: &Path, min_number: u64) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if let Some(number) = parse_log_file_number(&path) {
            if number >= min_number {
                found.push((number, path));
            }
        }
    }
    found.sort_by_key(|(n, _)| *n);
    Ok(found)
}

/// Replays every `.log` file at or after the recovered log number into a
/// fresh memtable, flushing it to a new L0 SSTable if it's non-empty, then
/// opens a brand-new active WAL. Returns the fresh active memtable, its
/// WAL, the active WAL's file number, and the highest sequence number
/// observed.
fn recover_memtable(
    dir: &Path,
    version_set: &VersionSet,
    table_cache: &TableCache,
    config: &EngineConfig,
) -> Result<(Memtable, Wal<WriteBatch>, u64, u64), EngineError> {
    let log_files = discover_log_files(dir, version_set.log_number())?;
    let memtable = Memtable::new();
    let mut max_sequence = version_set.last_sequence();

    for (_, path) in &log_files {
        let file_number = parse_log_file_number(path).expect("just discovered by this predicate");
        let wal: Wal<WriteBatch> = Wal::open_with_number(path, file_number)?;
        for batch in wal.replay_iter() {
            let batch = batch?;
            for (sequence, entry) in batch.iter() {
                memtable.add(sequence, entry.value_type, &entry.key, entry.value.as_deref());
                max_sequence = max_sequence.max(sequence);
            }
        }
    }

    if !memtable.is_empty() {
        let file_number = version_set.new_file_number();
        let path = sst_path(dir, file_number);
        let mut writer = SstWriter::new(&path, config.build_options())?;
        let mut smallest = None;
        let mut largest = None;
        for entry in memtable.iter() {
            writer.add(&entry.internal_key, entry.value.as_deref().unwrap_or(&[]))?;
            if smallest.is_none() {
                smallest = Some(entry.internal_key.clone());
            }
            largest = Some(entry.internal_key);
        }
        writer.finish()?;
        let file_size = fs::metadata(&path)?.len();

        let mut edit = VersionEdit::new();
        edit.add_file(
            0,
            crate::version::FileMetaData::new(
                file_number,
                file_size,
                smallest.expect("non-empty memtable has a smallest key"),
                largest.expect("non-empty memtable has a largest key"),
            ),
        );
        version_set.log_and_apply(edit, None)?;
        info!(file_number, "recovered WAL contents flushed to L0");
    }

    let active_wal_number = version_set.new_file_number();
    let active_wal_path = dir.join(log_file_name(active_wal_number));
    let active_wal = Wal::open_with_number(&active_wal_path, active_wal_number)?;
    {
        let mut edit = VersionEdit::new();
        edit.log_number = Some(active_wal_number);
        version_set.log_and_apply(edit, Some(active_wal_number))?;
    }

    for (_, path) in log_files {
        let _ = fs::remove_file(path);
    }

    Ok((memtable, active_wal, active_wal_number, max_sequence))
}

// ------------------------------------------------------------------------------------------------
// Background worker
// ------------------------------------------------------------------------------------------------

fn spawn_background_worker(state: Weak<EngineState>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let Some(strong) = state.upgrade() else { return };

            let should_stop = {
                let writer = strong.writer.lock().unwrap_or_else(|e| e.into_inner());
                writer.shutting_down
            };
            if should_stop {
                return;
            }

            let did_work = match run_one_background_step(&strong) {
                Ok(did_work) => did_work,
                Err(e) => {
                    warn!(error = %e, "background worker step failed");
                    let mut writer = strong.writer.lock().unwrap_or_else(|e| e.into_inner());
                    writer.background_error = Some(e.to_string());
                    strong.version_set.mark_background_error();
                    false
                }
            };
            drop(strong);

            if did_work {
                continue;
            }

            let Some(strong) = state.upgrade() else { return };
            let wakeup = strong.wakeup.lock().unwrap_or_else(|e| e.into_inner());
            let (mut wakeup, _timeout) = strong
                .work_available
                .wait_timeout(wakeup, Duration::from_millis(250))
                .unwrap_or_else(|e| e.into_inner());
            *wakeup = false;
        }
    })
}

fn run_one_background_step(state: &Arc<EngineState>) -> Result<bool, EngineError> {
    if flush_immutable_if_any(state)? {
        return Ok(true);
    }
    run_one_compaction_round(state)
}

fn flush_immutable_if_any(state: &Arc<EngineState>) -> Result<bool, EngineError> {
    let (memtable, log_number) = {
        let writer = state.writer.lock().unwrap_or_else(|e| e.into_inner());
        match &writer.immutable {
            Some((m, n)) => (m.clone(), *n),
            None => return Ok(false),
        }
    };

    let file_number = state.version_set.new_file_number();
    let path = sst_path(&state.dir, file_number);
    let mut writer = SstWriter::new(&path, state.config.build_options())?;
    let mut smallest = None;
    let mut largest = None;
    for entry in memtable.iter() {
        writer.add(&entry.internal_key, entry.value.as_deref().unwrap_or(&[]))?;
        if smallest.is_none() {
            smallest = Some(entry.internal_key.clone());
        }
        largest = Some(entry.internal_key);
    }
    let properties = writer.finish()?;

    if properties.record_count > 0 {
        let file_size = fs::metadata(&path)?.len();
        let mut edit = VersionEdit::new();
        edit.add_file(
            0,
            crate::version::FileMetaData::new(
                file_number,
                file_size,
                smallest.expect("non-empty memtable has a smallest key"),
                largest.expect("non-empty memtable has a largest key"),
            ),
        );
        state.version_set.log_and_apply(edit, None)?;
        info!(file_number, records = properties.record_count, "flushed immutable memtable to L0");
    } else {
        let _ = fs::remove_file(&path);
    }

    {
        let mut writer_state = state.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer_state.immutable = None;
    }
    let _ = fs::remove_file(state.dir.join(log_file_name(log_number)));
    Ok(true)
}

fn run_one_compaction_round(state: &Arc<EngineState>) -> Result<bool, EngineError> {
    let version = state.version_set.current();
    let Some(compaction) = compaction::pick_size_compaction(&version, &state.version_set, state.config.max_file_size)
    else {
        return Ok(false);
    };
    debug!(level = compaction.level, "running compaction");
    compaction::compact(
        compaction,
        &state.version_set,
        &state.table_cache,
        &state.snapshots,
        &state.dir,
        state.config.build_options(),
    )?;
    Ok(true)
}

// ------------------------------------------------------------------------------------------------
// Scan merge — dedup by user key, drop tombstones, respect `sequence`
// ------------------------------------------------------------------------------------------------

struct ScanHeapEntry {
    ikey: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for ScanHeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ikey == other.ikey
    }
}
impl Eq for ScanHeapEntry {}
impl PartialOrd for ScanHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScanHeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        internal_key::compare(&other.ikey, &self.ikey)
    }
}

fn merge_visible(sources: Vec<Vec<(Vec<u8>, Vec<u8>)>>, sequence: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut cursors: Vec<std::vec::IntoIter<(Vec<u8>, Vec<u8>)>> =
        sources.into_iter().map(|v| v.into_iter()).collect();
    let mut heap = BinaryHeap::new();
    for (i, cursor) in cursors.iter_mut().enumerate() {
        if let Some((ikey, value)) = cursor.next() {
            heap.push(ScanHeapEntry { ikey, value, source: i });
        }
    }

    let mut out = Vec::new();
    let mut current_user_key: Option<Vec<u8>> = None;
    while let Some(ScanHeapEntry { ikey, value, source }) = heap.pop() {
        if let Some((next_ikey, next_value)) = cursors[source].next() {
            heap.push(ScanHeapEntry { ikey: next_ikey, value: next_value, source });
        }

        let Some((user_key, seq, value_type)) = internal_key::split(&ikey) else {
            continue;
        };
        if seq > sequence {
            continue;
        }
        if current_user_key.as_deref() == Some(user_key) {
            continue;
        }
        current_user_key = Some(user_key.to_vec());

        if value_type == ValueType::Value {
            out.push((user_key.to_vec(), value));
        }
    }
    out
}
