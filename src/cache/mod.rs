//! Sharded LRU caches: the **table cache** (open [`Table`] handles, keyed by
//! file number) and the **block cache** (decoded data blocks, keyed by
//! `(cache_id, file_number, block_offset)`).
//!
//! Neither the teacher nor the rest of the retrieval pack pulls in an LRU
//! crate at this layer, so both caches are built on one hand-rolled
//! sharded LRU primitive ([`ShardedCache`]), following the same "own the
//! format, no dependency for a few hundred lines of logic" philosophy as
//! [`crate::encoding`].
//!
//! # Eviction
//!
//! Each cache shard tracks a strictly increasing logical clock. On a hit,
//! an entry's clock is bumped to the front; on insert, entries are evicted
//! oldest-clock-first until the shard's charge total fits its capacity.
//! Table handles are charged 1 each; blocks are charged their decoded byte
//! length.


use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::internal_key;
use crate::sstable::block::Block;
use crate::sstable::{SstError, Table};

const SHARD_COUNT: usize = 16;

// ------------------------------------------------------------------------------------------------
// ShardedCache — generic sharded, charge-weighted LRU
// ------------------------------------------------------------------------------------------------

struct CacheEntry<V> {
    value: V,
    charge: usize,
    clock: u64,
}

struct Shard<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Logical access order: oldest (lowest clock) evicted first.
    order: BTreeMap<u64, K>,
    next_clock: u64,
    usage: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> Shard<K, V> {
    fn new(capacity: usize) -> Self {
        Shard {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_clock: 0,
            usage: 0,
            capacity,
        }
    }

    fn touch(&mut self, key: &K) -> Option<V> {
        let clock = self.next_clock;
        self.next_clock += 1;
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.clock);
        entry.clock = clock;
        self.order.insert(clock, key.clone());
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: K, value: V, charge: usize) {
        if let Some(old) = self.entries.remove(&key) {
            self.order.remove(&old.clock);
            self.usage -= old.charge;
        }
        let clock = self.next_clock;
        self.next_clock += 1;
        self.usage += charge;
        self.order.insert(clock, key.clone());
        self.entries.insert(key, CacheEntry { value, charge, clock });
        self.evict_to_capacity();
    }

    fn remove(&mut self, key: &K) {
        if let Some(old) = self.entries.remove(key) {
            self.order.remove(&old.clock);
            self.usage -= old.charge;
        }
    }

    fn evict_to_capacity(&mut self) {
        while self.usage > self.capacity {
            let Some((&oldest_clock, _)) = self.order.iter().next() else {
                break;
            };
            let key = self.order.remove(&oldest_clock).expect("just peeked");
            if let Some(entry) = self.entries.remove(&key) {
                self.usage -= entry.charge;
            }
        }
    }
}

/// A charge-weighted LRU cache split into [`SHARD_COUNT`] independently
/// locked shards, so lookups for unrelated keys rarely contend.
pub struct ShardedCache<K, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ShardedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity / SHARD_COUNT).max(1);
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new(per_shard))).collect();
        ShardedCache { shards }
    }

    fn shard_for(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut shard = self.shard_for(key).lock().unwrap_or_else(|e| e.into_inner());
        shard.touch(key)
    }

    pub fn insert(&self, key: K, value: V, charge: usize) {
        let mut shard = self.shard_for(&key).lock().unwrap_or_else(|e| e.into_inner());
        shard.insert(key, value, charge);
    }

    pub fn remove(&self, key: &K) {
        let mut shard = self.shard_for(key).lock().unwrap_or_else(|e| e.into_inner());
        shard.remove(key);
    }
}

// ------------------------------------------------------------------------------------------------
// Block cache
// ------------------------------------------------------------------------------------------------

/// Caches decoded data blocks, keyed by `(cache_id, file_number, block_offset)`
/// so that blocks from different SSTable generations occupying the same
/// file number (after compaction replaces one) never collide.
pub struct BlockCache {
    cache: ShardedCache<(u64, u64, u64), Arc<Block>>,
    next_cache_id: AtomicU64,
}

impl BlockCache {
    pub fn new(capacity_bytes: usize) -> Self {
        BlockCache {
            cache: ShardedCache::new(capacity_bytes.max(1)),
            next_cache_id: AtomicU64::new(1),
        }
    }

    /// Allocate a globally unique id for a database instance's lifetime,
    /// used as the first component of every block-cache key it mints.
    pub fn new_cache_id(&self) -> u64 {
        self.next_cache_id.fetch_add(1, Ordering::Relaxed)
    }

    fn get(&self, cache_id: u64, file_number: u64, offset: u64) -> Option<Arc<Block>> {
        self.cache.get(&(cache_id, file_number, offset))
    }

    fn insert(&self, cache_id: u64, file_number: u64, offset: u64, block: Arc<Block>, charge: usize) {
        self.cache.insert((cache_id, file_number, offset), block, charge);
    }
}

// ------------------------------------------------------------------------------------------------
// Table cache
// ------------------------------------------------------------------------------------------------

/// Caches open [`Table`] handles (mmap + parsed index/filter/properties),
/// keyed by file number, and interposes a [`BlockCache`] in front of every
/// data-block read so hot blocks needn't be re-parsed from the mmap on
/// every scan. Index, filter, and properties blocks stay resident on the
/// `Table` itself and are never evicted independently — only the whole
/// table handle is, on table-cache pressure.
pub struct TableCache {
    dir: PathBuf,
    tables: ShardedCache<u64, Arc<Table>>,
    blocks: BlockCache,
    cache_id: u64,
}

fn sst_path(dir: &std::path::Path, file_number: u64) -> PathBuf {
    dir.join(crate::sstable::sst_file_name(file_number))
}

impl TableCache {
    pub fn new(dir: impl Into<PathBuf>, table_capacity: usize, block_capacity_bytes: usize) -> Self {
        let blocks = BlockCache::new(block_capacity_bytes);
        let cache_id = blocks.new_cache_id();
        TableCache {
            dir: dir.into(),
            tables: ShardedCache::new(table_capacity.max(1)),
            blocks,
            cache_id,
        }
    }

    /// Returns the table for `file_number`, opening (and parsing its
    /// footer/index/filter/properties) on a cache miss.
    pub fn get_table(&self, file_number: u64) -> Result<Arc<Table>, SstError> {
        if let Some(table) = self.tables.get(&file_number) {
            return Ok(table);
        }
        let table = Arc::new(Table::open(sst_path(&self.dir, file_number), file_number)?);
        self.tables.insert(file_number, table.clone(), 1);
        Ok(table)
    }

    /// Drops `file_number` from the table cache — called once a compacted-
    /// away file is no longer referenced by any version, so its file
    /// handle and cached blocks can be released before the file is deleted.
    pub fn evict(&self, file_number: u64) {
        self.tables.remove(&file_number);
    }

    fn data_block(&self, table: &Table, file_number: u64, handle: crate::sstable::BlockHandle) -> Result<Arc<Block>, SstError> {
        if let Some(block) = self.blocks.get(self.cache_id, file_number, handle.offset) {
            return Ok(block);
        }
        let block = Arc::new(table.read_data_block(&handle)?);
        let charge = handle.size as usize;
        self.blocks
            .insert(self.cache_id, file_number, handle.offset, block.clone(), charge);
        Ok(block)
    }

    /// Point lookup through the table and block caches.
    pub fn get(&self, file_number: u64, lookup_key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, SstError> {
        let table = self.get_table(file_number)?;
        let user_key = internal_key::user_key(lookup_key);

        let Some(handle) = table.find_data_block_handle(lookup_key)? else {
            return Ok(None);
        };
        if !table.may_contain(handle.offset, user_key) {
            return Ok(None);
        }
        let block = self.data_block(&table, file_number, handle)?;
        let mut it = block.seek(lookup_key, internal_key::compare);
        if it.valid() && internal_key::user_key(it.key()) == user_key {
            return Ok(Some((it.key().to_vec(), it.value().to_vec())));
        }
        Ok(None)
    }

    /// Forward iterator over `file_number`'s entries starting at `start`
    /// (or the beginning of the table if empty), routing every data-block
    /// read through the block cache.
    pub fn iter_from(&self, file_number: u64, start: &[u8]) -> Result<CachedTableIter<'_>, SstError> {
        let table = self.get_table(file_number)?;
        CachedTableIter::new(self, table, file_number, start)
    }
}

/// Like [`crate::sstable::iterator::TableIter`], but fetches data blocks
/// through the owning [`TableCache`]'s block cache instead of reading the
/// mmap directly on every call.
pub struct CachedTableIter<'a> {
    cache: &'a TableCache,
    table: Arc<Table>,
    file_number: u64,
    index_entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
    current_block: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl<'a> CachedTableIter<'a> {
    fn new(cache: &'a TableCache, table: Arc<Table>, file_number: u64, start: &[u8]) -> Result<Self, SstError> {
        let mut index_all: Vec<(Vec<u8>, Vec<u8>)> = table.index_block().iter().collect();
        if !start.is_empty() {
            let cut = index_all
                .iter()
                .position(|(separator, _)| {
                    internal_key::compare(separator, start) != std::cmp::Ordering::Less
                })
                .unwrap_or(index_all.len());
            index_all.drain(..cut);
        }

        let mut iter = CachedTableIter {
            cache,
            table,
            file_number,
            index_entries: index_all.into_iter(),
            current_block: Vec::new().into_iter(),
        };
        iter.load_next_block()?;

        if !start.is_empty() {
            let filtered: Vec<_> = iter
                .current_block
                .filter(|(key, _)| internal_key::compare(key, start) != std::cmp::Ordering::Less)
                .collect();
            iter.current_block = filtered.into_iter();
        }
        Ok(iter)
    }

    fn load_next_block(&mut self) -> Result<(), SstError> {
        match self.index_entries.next() {
            Some((_, handle_bytes)) => {
                let (handle, _) = crate::sstable::BlockHandle::decode_from(&handle_bytes)?;
                let block = self.cache.data_block(&self.table, self.file_number, handle)?;
                self.current_block = block.iter().collect::<Vec<_>>().into_iter();
            }
            None => self.current_block = Vec::new().into_iter(),
        }
        Ok(())
    }
}

impl<'a> Iterator for CachedTableIter<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>), SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current_block.next() {
                return Some(Ok(entry));
            }
            if self.index_entries.len() == 0 {
                return None;
            }
            if let Err(e) = self.load_next_block() {
                return Some(Err(e));
            }
        }
    }
}
