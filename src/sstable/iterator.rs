//! [`TableIter`] — a two-level iterator composing the index block with each
//! data block it points at, yielding `(internal_key, value)` pairs in
//! ascending internal-key order.
//!
//! Index entries and data-block entries are both decoded eagerly into an
//! owned `Vec` up front (blocks are small — a few KiB — so this avoids the
//! self-referential-borrow problem of holding a [`super::block::BlockIter`]
//! and the [`super::block::Block`] it borrows from in the same struct).

use std::cmp::Ordering;

use crate::internal_key;

use super::{BlockHandle, SstError, Table};

/// Forward iterator over one table's entries, starting at the first entry
/// `>= start` (or the first entry in the table if `start` is empty).
pub struct TableIter<'a> {
    table: &'a Table,
    index_entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
    current_block: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl<'a> TableIter<'a> {
    pub(crate) fn new(table: &'a Table, start: &[u8]) -> Result<Self, SstError> {
        let mut index_all: Vec<(Vec<u8>, Vec<u8>)> = table.index_block().iter().collect();
        if !start.is_empty() {
            let cut = index_all
                .iter()
                .position(|(separator, _)| internal_key::compare(separator, start) != Ordering::Less)
                .unwrap_or(index_all.len());
            index_all.drain(..cut);
        }

        let mut iter = TableIter {
            table,
            index_entries: index_all.into_iter(),
            current_block: Vec::new().into_iter(),
        };
        iter.load_next_block()?;

        if !start.is_empty() {
            let filtered: Vec<_> = iter
                .current_block
                .filter(|(key, _)| internal_key::compare(key, start) != Ordering::Less)
                .collect();
            iter.current_block = filtered.into_iter();
        }

        Ok(iter)
    }

    fn load_next_block(&mut self) -> Result<(), SstError> {
        match self.index_entries.next() {
            Some((_, handle_bytes)) => {
                let (handle, _) = BlockHandle::decode_from(&handle_bytes)?;
                let block = self.table.read_data_block(&handle)?;
                self.current_block = block.iter().collect::<Vec<_>>().into_iter();
            }
            None => self.current_block = Vec::new().into_iter(),
        }
        Ok(())
    }
}

impl<'a> Iterator for TableIter<'a> {
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
