//! SSTable writer — builds a complete, immutable SSTable file from a single
//! sorted stream of `(internal_key, value)` pairs.
//!
//! # Input requirement
//!
//! Entries **must** arrive in strictly increasing internal-key order
//! ([`crate::internal_key::compare`]). A deletion is an ordinary entry whose
//! internal key carries [`crate::internal_key::ValueType::Deletion`] — there
//! is no separate tombstone stream.
//!
//! # Atomicity
//!
//! Everything is written to `path` with extension `.dbtmp`, flushed and
//! synced, then renamed into place. A crash cannot leave a partially-written
//! SSTable at its final path.

use std::{
    cmp::Ordering,
    fs::{File, OpenOptions, rename},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::encoding::{Decode, Encode, EncodingError};
use crate::internal_key;

use super::{
    BLOCK_TRAILER_SIZE, BlockHandle, COMPRESSION_NONE, DEFAULT_BLOCK_RESTART_INTERVAL,
    DEFAULT_BLOCK_SIZE, Footer, METAINDEX_FILTER_KEY, METAINDEX_PROPERTIES_KEY, SstError,
    block::BlockBuilder, crc_of, filter::FilterBlockBuilder,
};

/// Table-level metadata captured while building, stored in the properties
/// block and consulted by the version/compaction layer without reopening
/// the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    pub record_count: u64,
    pub tombstone_count: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub smallest_sequence: u64,
    pub largest_sequence: u64,
    pub creation_unix_nanos: u64,
}

impl Encode for TableProperties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.record_count.encode_to(buf)?;
        self.tombstone_count.encode_to(buf)?;
        self.smallest_key.encode_to(buf)?;
        self.largest_key.encode_to(buf)?;
        self.smallest_sequence.encode_to(buf)?;
        self.largest_sequence.encode_to(buf)?;
        self.creation_unix_nanos.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableProperties {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (record_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tombstone_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (smallest_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (largest_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (smallest_sequence, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (largest_sequence, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (creation_unix_nanos, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                record_count,
                tombstone_count,
                smallest_key,
                largest_key,
                smallest_sequence,
                largest_sequence,
                creation_unix_nanos,
            },
            off,
        ))
    }
}

impl TableProperties {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, SstError> {
        let (props, _) = <Self as Decode>::decode_from(bytes)?;
        Ok(props)
    }

    fn encode(&self) -> Result<Vec<u8>, SstError> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf)?;
        Ok(buf)
    }
}

/// Tunable knobs for [`SstWriter::new`], mirroring the engine's
/// `block_size`/`block_restart_interval` configuration options.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub block_size: usize,
    pub block_restart_interval: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_restart_interval: DEFAULT_BLOCK_RESTART_INTERVAL,
        }
    }
}

/// Builds one SSTable file from a sorted `(internal_key, value)` stream.
pub struct SstWriter {
    options: BuildOptions,
    out: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    offset: u64,

    data_block: BlockBuilder,
    data_block_first_key: Option<Vec<u8>>,
    pending_index_entry: Option<(Vec<u8>, BlockHandle)>,
    filter_builder: FilterBlockBuilder,
    index_block: BlockBuilder,

    record_count: u64,
    tombstone_count: u64,
    smallest_key: Option<Vec<u8>>,
    largest_key: Option<Vec<u8>>,
    smallest_sequence: u64,
    largest_sequence: u64,
    last_key: Vec<u8>,
}

impl SstWriter {
    /// Opens `path` (actually `path` with extension `dbtmp` until
    /// [`Self::finish`] renames it) for writing. Call [`Self::add`] for every
    /// entry in ascending internal-key order, then [`Self::finish`].
    pub fn new(path: impl AsRef<Path>, options: BuildOptions) -> Result<Self, SstError> {
        let final_path = path.as_ref().to_path_buf();
        let mut tmp_path = final_path.clone();
        tmp_path.set_extension("dbtmp");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(SstWriter {
            out: BufWriter::new(file),
            tmp_path,
            final_path,
            offset: 0,
            data_block: BlockBuilder::new(options.block_restart_interval),
            data_block_first_key: None,
            pending_index_entry: None,
            filter_builder: FilterBlockBuilder::new(),
            index_block: BlockBuilder::new(options.block_restart_interval),
            record_count: 0,
            tombstone_count: 0,
            smallest_key: None,
            largest_key: None,
            smallest_sequence: u64::MAX,
            largest_sequence: 0,
            last_key: Vec::new(),
            options,
        })
    }

    /// Appends one entry. `key` must be strictly greater than every
    /// previously added key in internal-key order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), SstError> {
        debug_assert!(
            self.record_count == 0
                || internal_key::compare(&self.last_key, key) == Ordering::Less,
            "SSTable entries must be added in strictly increasing internal-key order"
        );

        self.flush_pending_index_entry(key);

        if self.data_block_first_key.is_none() {
            self.data_block_first_key = Some(key.to_vec());
        }
        self.filter_builder
            .add_key(self.offset, internal_key::user_key(key));
        self.data_block.add(key, value);

        if let Some((_, sequence, value_type)) = internal_key::split(key) {
            self.smallest_sequence = self.smallest_sequence.min(sequence);
            self.largest_sequence = self.largest_sequence.max(sequence);
            if value_type == internal_key::ValueType::Deletion {
                self.tombstone_count += 1;
            }
        }

        if self.smallest_key.is_none() {
            self.smallest_key = Some(key.to_vec());
        }
        self.largest_key = Some(key.to_vec());
        self.record_count += 1;
        self.last_key = key.to_vec();

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Number of entries added so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Bytes written to the output file so far (blocks flushed, not counting
    /// the still-open data block), used to decide when to cut the output
    /// over to a new SSTable during compaction.
    pub fn approximate_size(&self) -> u64 {
        self.offset
    }

    fn flush_pending_index_entry(&mut self, next_key: &[u8]) {
        if let Some((separator_source, handle)) = self.pending_index_entry.take() {
            let separator = internal_key::find_shortest_separator(
                internal_key::user_key(&separator_source),
                internal_key::user_key(next_key),
            );
            let ikey = internal_key::build(
                &separator,
                internal_key::MAX_SEQUENCE_NUMBER,
                internal_key::ValueType::Value,
            );
            let mut handle_bytes = Vec::new();
            handle.encode_to(&mut handle_bytes);
            self.index_block.add(&ikey, &handle_bytes);
        }
    }

    fn flush_data_block(&mut self) -> Result<(), SstError> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let builder = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(self.options.block_restart_interval),
        );
        let first_key = self
            .data_block_first_key
            .take()
            .expect("non-empty block has a first key");
        let handle = self.write_block(builder.finish())?;
        self.pending_index_entry = Some((first_key, handle));
        Ok(())
    }

    fn write_block(&mut self, contents: Vec<u8>) -> Result<BlockHandle, SstError> {
        let handle = BlockHandle {
            offset: self.offset,
            size: contents.len() as u64,
        };
        let crc = crc_of(COMPRESSION_NONE, &contents);
        self.out.write_all(&contents)?;
        self.out.write_all(&[COMPRESSION_NONE])?;
        self.out.write_all(&crc.to_le_bytes())?;
        self.offset += contents.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Flushes the final block, writes the filter/properties/metaindex/index
    /// blocks and the footer, syncs, and atomically renames into place.
    /// Returns the table's properties, so the caller can build `FileMetaData`
    /// without reopening the file.
    pub fn finish(mut self) -> Result<TableProperties, SstError> {
        self.flush_data_block()?;
        if let Some(last_key) = self.largest_key.clone() {
            let successor = internal_key::find_short_successor(internal_key::user_key(&last_key));
            self.flush_pending_index_entry(&internal_key::build(
                &successor,
                internal_key::MAX_SEQUENCE_NUMBER,
                internal_key::ValueType::Value,
            ));
        }

        let filter_bytes = self.filter_builder.finish();
        let filter_handle = self.write_block(filter_bytes)?;

        let properties = TableProperties {
            record_count: self.record_count,
            tombstone_count: self.tombstone_count,
            smallest_key: self.smallest_key.clone().unwrap_or_default(),
            largest_key: self.largest_key.clone().unwrap_or_default(),
            smallest_sequence: if self.record_count == 0 {
                0
            } else {
                self.smallest_sequence
            },
            largest_sequence: self.largest_sequence,
            creation_unix_nanos: unix_nanos_now(),
        };
        let properties_handle = self.write_block(properties.encode()?)?;

        let mut metaindex_block = BlockBuilder::new(2);
        let mut filter_handle_bytes = Vec::new();
        filter_handle.encode_to(&mut filter_handle_bytes);
        metaindex_block.add(METAINDEX_FILTER_KEY.as_bytes(), &filter_handle_bytes);
        let mut properties_handle_bytes = Vec::new();
        properties_handle.encode_to(&mut properties_handle_bytes);
        metaindex_block.add(METAINDEX_PROPERTIES_KEY.as_bytes(), &properties_handle_bytes);
        let metaindex_handle = self.write_block(metaindex_block.finish())?;

        let index_block = std::mem::replace(&mut self.index_block, BlockBuilder::new(1));
        let index_handle = self.write_block(index_block.finish())?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        self.out.write_all(&footer.encode())?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        drop(self.out);

        rename(&self.tmp_path, &self.final_path)?;
        Ok(properties)
    }
}

fn unix_nanos_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
