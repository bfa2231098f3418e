//! # Leveled compaction engine
//!
//! Picks a set of input files (size-triggered, seek-triggered, or a manual
//! range), expands it to a safe, atomic rewrite unit, and merges it one
//! level deeper — or, for the single-file/no-overlap case, moves the file
//! without rewriting it at all.
//!
//! ## Input selection
//! - **Size-triggered**: the version's highest-scoring level, round-robin
//!   via the level's `compact_pointer`.
//! - **Seek-triggered**: a single file nominated by
//!   [`crate::version::Version::record_read_sample`] once its seek budget
//!   is exhausted.
//! - **Manual**: a user-supplied `[start, end)` range, one level.
//!
//! ## Expansion
//! [`setup_inputs`] grows the level-L input set to include every L0 file it
//! overlaps (L0 files may overlap each other), pulls in any same-user-key
//! boundary file via [`add_boundary_inputs`], computes the overlapping
//! L+1 set, and greedily grows L further as long as L+1's set does not grow
//! and the combined size stays under `expanded_compaction_byte_size_limit`.
//! The L+2 ("grandparent") overlap is recorded to bound individual output
//! files via [`Compaction::should_stop_before`].
//!
//! ## Execution
//! [`compact`] merges the inputs through [`crate::merge_iter::MergingIter`],
//! dropping entries no live snapshot can still observe, and installs the
//! result via [`crate::version::VersionSet::log_and_apply`].

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::TableCache;
use crate::internal_key::{self, ValueType};
use crate::merge_iter::{MergeIterError, MergeItem, MergingIter};
use crate::snapshot::SnapshotList;
use crate::sstable::builder::BuildOptions;
use crate::sstable::{SstError, SstWriter, sst_file_name};
use crate::version::{FileMetaData, NUM_LEVELS, Version, VersionEdit, VersionError, VersionSet};

/// Input sets larger than this (bytes) are rejected during the greedy
/// level-L expansion pass, even if L+1's set would not otherwise grow.
pub fn expanded_compaction_byte_size_limit(max_file_size: u64) -> u64 {
    25 * max_file_size
}

/// An output file is cut over once its accumulated overlap with grandparent
/// (L+2) files crosses this many bytes.
pub fn max_grandparent_overlap_bytes(max_file_size: u64) -> u64 {
    10 * max_file_size
}

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("merge error: {0}")]
    Merge(String),
}

impl From<MergeIterError> for CompactionError {
    fn from(e: MergeIterError) -> Self {
        CompactionError::Merge(e.0)
    }
}

// ------------------------------------------------------------------------------------------------
// Key-range helpers
// ------------------------------------------------------------------------------------------------

fn key_range(files: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
    let mut smallest = files[0].smallest.clone();
    let mut largest = files[0].largest.clone();
    for f in &files[1..] {
        if internal_key::compare(&f.smallest, &smallest) == Ordering::Less {
            smallest = f.smallest.clone();
        }
        if internal_key::compare(&f.largest, &largest) == Ordering::Greater {
            largest = f.largest.clone();
        }
    }
    (smallest, largest)
}

fn union_range(a: (&[u8], &[u8]), b: (&[u8], &[u8])) -> (Vec<u8>, Vec<u8>) {
    let smallest = if internal_key::compare(a.0, b.0) == Ordering::Less {
        a.0.to_vec()
    } else {
        b.0.to_vec()
    };
    let largest = if internal_key::compare(a.1, b.1) == Ordering::Greater {
        a.1.to_vec()
    } else {
        b.1.to_vec()
    };
    (smallest, largest)
}

/// Files in `files` whose user-key range intersects the closed range
/// `[user_key(smallest), user_key(largest)]`.
fn files_overlapping(
    files: &[Arc<FileMetaData>],
    smallest: &[u8],
    largest: &[u8],
) -> Vec<Arc<FileMetaData>> {
    let s_user = internal_key::user_key(smallest);
    let l_user = internal_key::user_key(largest);
    files
        .iter()
        .filter(|f| {
            let f_s = internal_key::user_key(&f.smallest);
            let f_l = internal_key::user_key(&f.largest);
            !(f_l < s_user || f_s > l_user)
        })
        .cloned()
        .collect()
}

/// Pulls in any file from `level_files` whose smallest internal key is
/// strictly greater than the current largest input but shares its
/// user-key — two versions of the same key must never be split across a
/// compaction boundary.
fn add_boundary_inputs(level_files: &[Arc<FileMetaData>], inputs: &mut Vec<Arc<FileMetaData>>) {
    loop {
        let Some(largest) = inputs
            .iter()
            .max_by(|a, b| internal_key::compare(&a.largest, &b.largest))
            .cloned()
        else {
            break;
        };
        let largest_user = internal_key::user_key(&largest.largest).to_vec();
        let candidate = level_files
            .iter()
            .find(|f| {
                !inputs.iter().any(|x| x.number == f.number)
                    && internal_key::compare(&f.smallest, &largest.largest) == Ordering::Greater
                    && internal_key::user_key(&f.smallest) == largest_user.as_slice()
            })
            .cloned();
        match candidate {
            Some(f) => inputs.push(f),
            None => break,
        }
    }
}

fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

// ------------------------------------------------------------------------------------------------
// Compaction — a selected, expanded rewrite unit
// ------------------------------------------------------------------------------------------------

/// One compaction: `inputs[0]` at `level`, `inputs[1]` (the overlapping
/// slice of `level + 1`), and the `level + 2` files ("grandparents") that
/// bound individual output file sizes.
pub struct Compaction {
    pub level: usize,
    pub inputs: [Vec<Arc<FileMetaData>>; 2],
    pub grandparents: Vec<Arc<FileMetaData>>,
    version: Arc<Version>,
    max_file_size: u64,
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
}

impl Compaction {
    /// A single input file moving to `level + 1` with no rewrite is safe
    /// exactly when there is nothing at `level + 1` to merge with and the
    /// move would not create excessive overlap two levels down.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[1].is_empty()
            && self.inputs[0].len() == 1
            && total_file_size(&self.grandparents) <= max_grandparent_overlap_bytes(self.max_file_size)
    }

    /// `true` if no file at `level + 2` or deeper overlaps `user_key` — the
    /// compaction is the last place a deleted key could still be found, so
    /// its tombstone can be dropped once no live snapshot needs it.
    pub fn is_base_level_for_key(&self, user_key: &[u8]) -> bool {
        for level in (self.level + 2)..NUM_LEVELS {
            for f in &self.version.levels[level] {
                if internal_key::user_key(&f.smallest) <= user_key
                    && user_key <= internal_key::user_key(&f.largest)
                {
                    return false;
                }
            }
        }
        true
    }

    /// Advances the grandparent pointer past every file whose `largest` is
    /// below `internal_key`, accumulating their sizes; once the running
    /// total crosses `max_grandparent_overlap_bytes` the current output
    /// should be closed and a new one started.
    pub fn should_stop_before(&mut self, internal_key: &[u8]) -> bool {
        let limit = max_grandparent_overlap_bytes(self.max_file_size);
        while self.grandparent_index < self.grandparents.len()
            && internal_key::compare(&self.grandparents[self.grandparent_index].largest, internal_key)
                == Ordering::Less
        {
            self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            self.grandparent_index += 1;
        }
        let should_stop = self.seen_key && self.overlapped_bytes > limit;
        self.seen_key = true;
        if should_stop {
            self.overlapped_bytes = 0;
        }
        should_stop
    }
}

/// Expand a level-L seed input set into a full [`Compaction`]: L0
/// overlap-closure, boundary-input absorption, L+1 overlap, a greedy
/// re-expansion of L that doesn't grow L+1, and the L+2 grandparent set.
pub fn setup_inputs(
    version: Arc<Version>,
    level: usize,
    mut inputs0: Vec<Arc<FileMetaData>>,
    max_file_size: u64,
) -> Compaction {
    if level == 0 {
        loop {
            let (s, l) = key_range(&inputs0);
            let expanded = files_overlapping(&version.levels[0], &s, &l);
            if expanded.len() == inputs0.len() {
                break;
            }
            inputs0 = expanded;
        }
    }
    add_boundary_inputs(&version.levels[level], &mut inputs0);

    let (mut smallest, mut largest) = key_range(&inputs0);
    let mut inputs1 = files_overlapping(&version.levels[level + 1], &smallest, &largest);
    add_boundary_inputs(&version.levels[level + 1], &mut inputs1);

    if !inputs1.is_empty() {
        let (s1, l1) = key_range(&inputs1);
        let (cs, cl) = union_range((&smallest, &largest), (&s1, &l1));

        let mut expanded0 = files_overlapping(&version.levels[level], &cs, &cl);
        add_boundary_inputs(&version.levels[level], &mut expanded0);

        if expanded0.len() > inputs0.len() {
            let (es, el) = key_range(&expanded0);
            let mut expanded1 = files_overlapping(&version.levels[level + 1], &es, &el);
            add_boundary_inputs(&version.levels[level + 1], &mut expanded1);

            let expanded_bytes = total_file_size(&expanded0) + total_file_size(&expanded1);
            if expanded1.len() == inputs1.len()
                && expanded_bytes < expanded_compaction_byte_size_limit(max_file_size)
            {
                smallest = es;
                largest = el;
                inputs0 = expanded0;
                inputs1 = expanded1;
            }
        }
    }

    let grandparents = if level + 2 < NUM_LEVELS {
        let combined: Vec<Arc<FileMetaData>> =
            inputs0.iter().chain(inputs1.iter()).cloned().collect();
        let (gs, gl) = if combined.is_empty() {
            (smallest.clone(), largest.clone())
        } else {
            key_range(&combined)
        };
        files_overlapping(&version.levels[level + 2], &gs, &gl)
    } else {
        Vec::new()
    };

    Compaction {
        level,
        inputs: [inputs0, inputs1],
        grandparents,
        version,
        max_file_size,
        grandparent_index: 0,
        seen_key: false,
        overlapped_bytes: 0,
    }
}

// ------------------------------------------------------------------------------------------------
// Input selection
// ------------------------------------------------------------------------------------------------

/// Picks a size-triggered compaction at the version's highest-scoring
/// level, or `None` if no level is due.
pub fn pick_size_compaction(version: &Arc<Version>, vs: &VersionSet, max_file_size: u64) -> Option<Compaction> {
    if version.compaction_score < 1.0 {
        return None;
    }
    let level = version.compaction_level;
    let compact_pointer = vs.compact_pointer(level);

    let mut inputs0 = Vec::new();
    for f in &version.levels[level] {
        if compact_pointer.is_empty() || internal_key::compare(&f.largest, &compact_pointer) == Ordering::Greater {
            inputs0.push(f.clone());
            break;
        }
    }
    if inputs0.is_empty() {
        if let Some(f) = version.levels[level].first() {
            inputs0.push(f.clone());
        }
    }
    if inputs0.is_empty() {
        return None;
    }
    Some(setup_inputs(version.clone(), level, inputs0, max_file_size))
}

/// Picks a compaction for the single file nominated by a seek-budget
/// exhaustion (`(level, file_number)`, as surfaced by
/// [`crate::version::Version::record_read_sample`]).
pub fn pick_seek_compaction(
    version: &Arc<Version>,
    level: usize,
    file_number: u64,
    max_file_size: u64,
) -> Option<Compaction> {
    let file = version.levels[level].iter().find(|f| f.number == file_number)?.clone();
    Some(setup_inputs(version.clone(), level, vec![file], max_file_size))
}

/// Picks a manual compaction over `[start, end)` at `level`. For `level >
/// 0`, caps the selected input bytes at `max_file_size` (L0's files may
/// overlap, so L0 is never capped this way).
pub fn pick_manual_compaction(
    version: &Arc<Version>,
    level: usize,
    start: &[u8],
    end: &[u8],
    max_file_size: u64,
) -> Option<Compaction> {
    let mut inputs0: Vec<Arc<FileMetaData>> = version.levels[level]
        .iter()
        .filter(|f| {
            let f_s = internal_key::user_key(&f.smallest);
            let f_l = internal_key::user_key(&f.largest);
            !(f_l < start || f_s >= end)
        })
        .cloned()
        .collect();
    if inputs0.is_empty() {
        return None;
    }
    if level > 0 {
        let mut total = 0u64;
        let mut capped = Vec::new();
        for f in inputs0 {
            if total > 0 && total + f.file_size > max_file_size {
                break;
            }
            total += f.file_size;
            capped.push(f);
        }
        inputs0 = capped;
    }
    Some(setup_inputs(version.clone(), level, inputs0, max_file_size))
}

// ------------------------------------------------------------------------------------------------
// Merge execution
// ------------------------------------------------------------------------------------------------

fn sst_path(dir: &Path, file_number: u64) -> PathBuf {
    dir.join(sst_file_name(file_number))
}

/// Concatenates the (disjoint, sorted) files of one input level into a
/// single ascending stream, reading data blocks through the table cache.
struct ConcatIter<'a> {
    cache: &'a TableCache,
    files: std::vec::IntoIter<Arc<FileMetaData>>,
    current: Option<Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), SstError>> + 'a>>,
}

impl<'a> ConcatIter<'a> {
    fn new(cache: &'a TableCache, files: Vec<Arc<FileMetaData>>) -> Self {
        ConcatIter {
            cache,
            files: files.into_iter(),
            current: None,
        }
    }
}

impl<'a> Iterator for ConcatIter<'a> {
    type Item = MergeItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(it) = &mut self.current {
                match it.next() {
                    Some(Ok(entry)) => return Some(Ok(entry)),
                    Some(Err(e)) => return Some(Err(MergeIterError(e.to_string()))),
                    None => self.current = None,
                }
            }
            let f = self.files.next()?;
            match self.cache.iter_from(f.number, &[]) {
                Ok(it) => self.current = Some(Box::new(it)),
                Err(e) => return Some(Err(MergeIterError(e.to_string()))),
            }
        }
    }
}

fn build_children<'a>(compaction: &Compaction, table_cache: &'a TableCache) -> Vec<Box<dyn Iterator<Item = MergeItem> + 'a>> {
    let mut children: Vec<Box<dyn Iterator<Item = MergeItem> + 'a>> = Vec::new();
    if compaction.level == 0 {
        for f in &compaction.inputs[0] {
            children.push(Box::new(ConcatIter::new(table_cache, vec![f.clone()])));
        }
    } else if !compaction.inputs[0].is_empty() {
        children.push(Box::new(ConcatIter::new(table_cache, compaction.inputs[0].clone())));
    }
    if !compaction.inputs[1].is_empty() {
        children.push(Box::new(ConcatIter::new(table_cache, compaction.inputs[1].clone())));
    }
    children
}

struct OpenOutput {
    file_number: u64,
    path: PathBuf,
    writer: SstWriter,
    smallest: Option<Vec<u8>>,
    largest: Option<Vec<u8>>,
}

fn finish_output(edit: &mut VersionEdit, level: usize, out: OpenOutput) -> Result<(), CompactionError> {
    let props = out.writer.finish()?;
    if props.record_count == 0 {
        let _ = fs::remove_file(&out.path);
        return Ok(());
    }
    let file_size = fs::metadata(&out.path)?.len();
    let smallest = out.smallest.expect("non-empty output has a smallest key");
    let largest = out.largest.expect("non-empty output has a largest key");
    edit.add_file(level, FileMetaData::new(out.file_number, file_size, smallest, largest));
    Ok(())
}

/// Executes `compaction`: a trivial metadata-only move when possible,
/// otherwise a full merge through [`MergingIter`] with snapshot- and
/// base-level-aware drop rules, then installs the result via
/// [`VersionSet::log_and_apply`] and evicts/deletes the superseded inputs.
pub fn compact(
    compaction: Compaction,
    vs: &VersionSet,
    table_cache: &TableCache,
    snapshots: &SnapshotList,
    dir: &Path,
    build_options: BuildOptions,
) -> Result<(), CompactionError> {
    let mut edit = VersionEdit::new();

    if compaction.is_trivial_move() {
        let file = &compaction.inputs[0][0];
        edit.delete_file(compaction.level, file.number);
        edit.add_file(compaction.level + 1, (**file).clone());
        info!(level = compaction.level, file = file.number, "trivial move");
        vs.log_and_apply(edit, None)?;
        return Ok(());
    }

    let smallest_snapshot = snapshots.smallest(vs.last_sequence());
    let max_file_size = compaction.max_file_size;

    let children = build_children(&compaction, table_cache);
    let mut merged = MergingIter::new(children)?;

    let mut current_user_key: Option<Vec<u8>> = None;
    let mut last_sequence_for_key = internal_key::MAX_SEQUENCE_NUMBER;
    let mut output: Option<OpenOutput> = None;
    let mut overall_largest: Option<Vec<u8>> = None;

    let mut compaction = compaction;

    while let Some(item) = merged.next() {
        let (ikey, value) = item?;
        let (user_key, sequence, value_type) = internal_key::split(&ikey)
            .ok_or_else(|| CompactionError::Merge("malformed internal key during compaction".into()))?;

        let is_new_key = current_user_key.as_deref() != Some(user_key);
        if is_new_key {
            current_user_key = Some(user_key.to_vec());
            last_sequence_for_key = internal_key::MAX_SEQUENCE_NUMBER;
        }

        let mut drop_entry = false;
        if last_sequence_for_key <= smallest_snapshot {
            drop_entry = true;
        } else if value_type == ValueType::Deletion
            && sequence <= smallest_snapshot
            && compaction.is_base_level_for_key(user_key)
        {
            drop_entry = true;
        }
        last_sequence_for_key = sequence;

        if drop_entry {
            continue;
        }

        if compaction.should_stop_before(&ikey) {
            if let Some(out) = output.take() {
                finish_output(&mut edit, compaction.level + 1, out)?;
            }
        }

        if output.is_none() {
            let file_number = vs.new_file_number();
            let path = sst_path(dir, file_number);
            output = Some(OpenOutput {
                file_number,
                path: path.clone(),
                writer: SstWriter::new(&path, build_options)?,
                smallest: None,
                largest: None,
            });
        }

        let out = output.as_mut().expect("just ensured present");
        out.writer.add(&ikey, &value)?;
        if out.smallest.is_none() {
            out.smallest = Some(ikey.clone());
        }
        out.largest = Some(ikey.clone());
        overall_largest = Some(ikey.clone());

        if out.writer.approximate_size() >= max_file_size {
            let out = output.take().expect("just populated");
            finish_output(&mut edit, compaction.level + 1, out)?;
        }
    }

    if let Some(out) = output.take() {
        finish_output(&mut edit, compaction.level + 1, out)?;
    }

    for f in &compaction.inputs[0] {
        edit.delete_file(compaction.level, f.number);
    }
    for f in &compaction.inputs[1] {
        edit.delete_file(compaction.level + 1, f.number);
    }
    if let Some(largest) = overall_largest {
        edit.set_compact_pointer(compaction.level, largest);
    }

    debug!(
        level = compaction.level,
        inputs0 = compaction.inputs[0].len(),
        inputs1 = compaction.inputs[1].len(),
        "installing compaction result"
    );
    vs.log_and_apply(edit, None)?;

    for f in compaction.inputs[0].iter().chain(compaction.inputs[1].iter()) {
        table_cache.evict(f.number);
        let _ = fs::remove_file(sst_path(dir, f.number));
    }

    Ok(())
}
