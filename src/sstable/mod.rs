//! Sorted String Table (SSTable) module.
//!
//! An SSTable is an **immutable**, disk-resident, sorted sequence of
//! internal-key/value records, read through a memory map. Every record
//! visible through [`Table::get`]/[`Table::iter_from`] is already internal-key
//! tagged (`user_key ‖ seq ‖ type`, see [`crate::internal_key`]); this module
//! has no notion of LSN, timestamp, or range tombstones — deletions are
//! ordinary entries whose [`crate::internal_key::ValueType`] is `Deletion`.
//!
//! # On-disk layout
//!
//! ```text
//! [data block 0][type(1B)][crc32(4B)]
//! [data block 1][type(1B)][crc32(4B)]
//! ...
//! [filter block][type(1B)][crc32(4B)]
//! [properties block][type(1B)][crc32(4B)]
//! [metaindex block][type(1B)][crc32(4B)]
//! [index block][type(1B)][crc32(4B)]
//! [footer: 48 bytes]
//! ```
//!
//! Data, metaindex, and index blocks share the restart-point encoding defined
//! in [`block`]. The filter block ([`filter`]) holds one Bloom filter per
//! 2 KiB span of data blocks. The metaindex block maps block names
//! (`"filter.bloom"`, `"properties"`) to their [`BlockHandle`]s. The footer
//! holds the metaindex and index handles, zero-padded to 40 bytes, followed
//! by the 8-byte magic `0xdb4775248b80fb57`.
//!
//! # Sub-modules
//!
//! - [`block`] — restart-based data/metaindex/index block encoding.
//! - [`filter`] — per-span Bloom filter block.
//! - [`builder`] — [`SstWriter`] for building a table from a sorted stream.
//! - [`iterator`] — [`TableIter`], a two-level index × data-block iterator.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod block;
pub mod builder;
pub mod filter;
pub mod iterator;


// ------------------------------------------------------------------------------------------------
// Re-exports — public API surface
// ------------------------------------------------------------------------------------------------

pub use builder::{SstWriter, TableProperties};
pub use iterator::TableIter;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{fs::File, io, path::Path};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{decode_varint_u64, encode_varint_u64};
use crate::internal_key;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// `[type(1B)][crc32(4B)]` appended after every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Compression type tag for an uncompressed block (the only one supported).
pub const COMPRESSION_NONE: u8 = 0;

/// Fixed size of the footer at the end of every SSTable file.
pub const FOOTER_SIZE: usize = 48;

/// Magic number terminating the footer, identifying this file format.
pub const TABLE_MAGIC: u64 = 0xdb4775248b80fb57;

/// Default target size (bytes) for a single data block before it is cut.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default number of entries between restart points in a block.
pub const DEFAULT_BLOCK_RESTART_INTERVAL: usize = 16;

/// Canonical on-disk filename for SSTable file number `n`: `NNNNNN.ldb`.
pub fn sst_file_name(file_number: u64) -> String {
    format!("{file_number:06}.ldb")
}

const METAINDEX_FILTER_KEY: &str = "filter.bloom";
const METAINDEX_PROPERTIES_KEY: &str = "properties";

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable build/read operations.
#[derive(Debug, Error)]
pub enum SstError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] crate::encoding::EncodingError),

    #[error("block error: {0}")]
    Block(#[from] block::BlockError),

    #[error("filter block error: {0}")]
    Filter(#[from] filter::FilterBlockError),

    #[error("corruption: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// BlockHandle
// ------------------------------------------------------------------------------------------------

/// Points at a block within an SSTable file: its offset and content length
/// (excluding the 5-byte trailer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Upper bound on the varint-encoded length of a handle (two u64 varints).
    pub const MAX_ENCODED_LEN: usize = 2 * crate::encoding::MAX_VARINT_U64_LEN;

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        encode_varint_u64(self.offset, buf);
        encode_varint_u64(self.size, buf);
    }

    pub fn decode_from(buf: &[u8]) -> Result<(Self, usize), SstError> {
        let (offset, n1) = decode_varint_u64(buf).map_err(|_| corrupt("block handle"))?;
        let (size, n2) =
            decode_varint_u64(&buf[n1..]).map_err(|_| corrupt("block handle"))?;
        Ok((BlockHandle { offset, size }, n1 + n2))
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LEN);
        self.encode_to(&mut buf);
        buf
    }
}

fn corrupt(what: &str) -> SstError {
    SstError::Corruption(format!("malformed {what}"))
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut packed = Vec::with_capacity(2 * BlockHandle::MAX_ENCODED_LEN);
        self.metaindex_handle.encode_to(&mut packed);
        self.index_handle.encode_to(&mut packed);
        packed.resize(FOOTER_SIZE - 8, 0);

        let mut out = [0u8; FOOTER_SIZE];
        out[..FOOTER_SIZE - 8].copy_from_slice(&packed);
        out[FOOTER_SIZE - 8..].copy_from_slice(&TABLE_MAGIC.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SstError> {
        if bytes.len() != FOOTER_SIZE {
            return Err(corrupt("footer length"));
        }
        let magic = u64::from_le_bytes(bytes[FOOTER_SIZE - 8..].try_into().unwrap());
        if magic != TABLE_MAGIC {
            return Err(SstError::Corruption("bad footer magic".into()));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(&bytes[..FOOTER_SIZE - 8])?;
        let (index_handle, _) = BlockHandle::decode_from(&bytes[n..FOOTER_SIZE - 8])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Block trailer helpers (shared by builder and reader)
// ------------------------------------------------------------------------------------------------

fn crc_of(block_type: u8, contents: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(contents);
    hasher.update(&[block_type]);
    hasher.finalize()
}

/// Read a block at `handle` from `mmap`, verifying its trailer CRC.
fn read_block(mmap: &Mmap, handle: &BlockHandle) -> Result<Vec<u8>, SstError> {
    let start = usize::try_from(handle.offset).map_err(|_| corrupt("block offset"))?;
    let size = usize::try_from(handle.size).map_err(|_| corrupt("block size"))?;
    let end = start
        .checked_add(size)
        .ok_or_else(|| corrupt("block range"))?;
    if end + BLOCK_TRAILER_SIZE > mmap.len() {
        return Err(corrupt("block out of range"));
    }
    let contents = &mmap[start..end];
    let block_type = mmap[end];
    let stored_crc = u32::from_le_bytes(mmap[end + 1..end + 5].try_into().unwrap());
    if crc_of(block_type, contents) != stored_crc {
        return Err(SstError::Corruption(format!(
            "checksum mismatch in block at offset {}",
            handle.offset
        )));
    }
    Ok(contents.to_vec())
}

// ------------------------------------------------------------------------------------------------
// Table — immutable, memory-mapped reader
// ------------------------------------------------------------------------------------------------

/// A single immutable, memory-mapped SSTable.
pub struct Table {
    /// File number this table was opened from (assigned by the caller).
    pub file_number: u64,
    mmap: Mmap,
    index: block::Block,
    filter: Option<filter::FilterBlock>,
    pub properties: TableProperties,
}

impl Table {
    /// Opens and validates an SSTable file: footer, metaindex, filter
    /// (if present), properties, and index.
    pub fn open(path: impl AsRef<Path>, file_number: u64) -> Result<Self, SstError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < FOOTER_SIZE {
            return Err(SstError::Corruption("file too small for footer".into()));
        }

        let footer = Footer::decode(&mmap[mmap.len() - FOOTER_SIZE..])?;

        let metaindex_bytes = read_block(&mmap, &footer.metaindex_handle)?;
        let metaindex = block::Block::new(metaindex_bytes)?;

        let mut filter_handle = None;
        let mut properties_handle = None;
        for (name, handle_bytes) in metaindex.iter() {
            let (handle, _) = BlockHandle::decode_from(&handle_bytes)?;
            match name.as_slice() {
                n if n == METAINDEX_FILTER_KEY.as_bytes() => filter_handle = Some(handle),
                n if n == METAINDEX_PROPERTIES_KEY.as_bytes() => properties_handle = Some(handle),
                _ => {}
            }
        }

        let filter = match filter_handle {
            Some(h) => Some(filter::FilterBlock::parse(&read_block(&mmap, &h)?)?),
            None => None,
        };

        let properties = match properties_handle {
            Some(h) => TableProperties::decode(&read_block(&mmap, &h)?)?,
            None => return Err(SstError::Corruption("missing properties block".into())),
        };

        let index_bytes = read_block(&mmap, &footer.index_handle)?;
        let index = block::Block::new(index_bytes)?;

        Ok(Table {
            file_number,
            mmap,
            index,
            filter,
            properties,
        })
    }

    /// Total on-disk size of this table in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Smallest internal key stored in this table.
    pub fn smallest_key(&self) -> &[u8] {
        &self.properties.smallest_key
    }

    /// Largest internal key stored in this table.
    pub fn largest_key(&self) -> &[u8] {
        &self.properties.largest_key
    }

    /// Looks up the first entry whose internal key is `>= lookup_key`, and
    /// returns it only if its user-key matches `lookup_key`'s user-key —
    /// i.e. the newest visible version of that user key in this table.
    pub fn get(&self, lookup_key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, SstError> {
        let user_key = internal_key::user_key(lookup_key);

        let data_handle = match self.find_data_block_handle(lookup_key)? {
            Some(h) => h,
            None => return Ok(None),
        };

        if let Some(filter) = &self.filter {
            if !filter.may_contain(data_handle.offset, user_key) {
                return Ok(None);
            }
        }

        let block = block::Block::new(read_block(&self.mmap, &data_handle)?)?;
        let mut it = block.seek(lookup_key, internal_key::compare);
        if it.valid() && internal_key::user_key(it.key()) == user_key {
            return Ok(Some((it.key().to_vec(), it.value().to_vec())));
        }
        Ok(None)
    }

    /// Returns an iterator over `(internal_key, value)` starting at the first
    /// entry `>= start` (or the beginning of the table if `start` is empty).
    pub fn iter_from(&self, start: &[u8]) -> Result<TableIter<'_>, SstError> {
        TableIter::new(self, start)
    }

    /// `true` if this table's filter block says `user_key` might be
    /// present in the data block starting at `block_offset`. Always `true`
    /// when the table has no filter block.
    pub(crate) fn may_contain(&self, block_offset: u64, user_key: &[u8]) -> bool {
        match &self.filter {
            Some(filter) => filter.may_contain(block_offset, user_key),
            None => true,
        }
    }

    /// Index-block handle for the data block that may contain `lookup_key`,
    /// or `None` if `lookup_key` is past every block in this table.
    pub(crate) fn find_data_block_handle(&self, lookup_key: &[u8]) -> Result<Option<BlockHandle>, SstError> {
        let mut it = self.index.seek(lookup_key, internal_key::compare);
        if !it.valid() {
            return Ok(None);
        }
        let (handle, _) = BlockHandle::decode_from(it.value())?;
        Ok(Some(handle))
    }

    pub(crate) fn index_block(&self) -> &block::Block {
        &self.index
    }

    pub(crate) fn read_data_block(&self, handle: &BlockHandle) -> Result<block::Block, SstError> {
        Ok(block::Block::new(read_block(&self.mmap, handle)?)?)
    }
}
