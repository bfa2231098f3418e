use std::sync::Arc;

use tempfile::tempdir;

use crate::cache::TableCache;
use crate::compaction::{self, setup_inputs};
use crate::internal_key::{self, ValueType};
use crate::snapshot::SnapshotList;
use crate::sstable::builder::{BuildOptions, SstWriter};
use crate::version::{FileMetaData, Version, VersionEdit, VersionSet};

fn ikey(user: &[u8], seq: u64, vtype: ValueType) -> Vec<u8> {
    internal_key::build(user, seq, vtype)
}

fn write_table(dir: &std::path::Path, file_number: u64, entries: &[(Vec<u8>, Vec<u8>)]) -> Arc<FileMetaData> {
    let path = dir.join(crate::sstable::sst_file_name(file_number));
    let mut writer = SstWriter::new(&path, BuildOptions::default()).unwrap();
    for (key, value) in entries {
        writer.add(key, value).unwrap();
    }
    writer.finish().unwrap();
    let file_size = std::fs::metadata(&path).unwrap().len();
    Arc::new(FileMetaData::new(
        file_number,
        file_size,
        entries.first().unwrap().0.clone(),
        entries.last().unwrap().0.clone(),
    ))
}

fn empty_version() -> Arc<Version> {
    Arc::new(Version {
        levels: vec![Vec::new(); crate::version::NUM_LEVELS],
        compaction_level: 0,
        compaction_score: 0.0,
    })
}

#[test]
fn trivial_move_when_no_level_plus_one_overlap() {
    let dir = tempdir().unwrap();
    let file = write_table(
        dir.path(),
        1,
        &[
            (ikey(b"a", 1, ValueType::Value), b"1".to_vec()),
            (ikey(b"m", 1, ValueType::Value), b"2".to_vec()),
        ],
    );
    let version = empty_version();
    let compaction = setup_inputs(version, 1, vec![file], 2 * 1024 * 1024);
    assert!(compaction.is_trivial_move());
}

#[test]
fn expansion_absorbs_overlapping_level_plus_one_files() {
    let dir = tempdir().unwrap();
    let l1_a = write_table(
        dir.path(),
        1,
        &[(ikey(b"a", 1, ValueType::Value), b"1".to_vec())],
    );
    let l2_overlap = write_table(
        dir.path(),
        2,
        &[(ikey(b"a", 0, ValueType::Value), b"0".to_vec())],
    );
    let l2_disjoint = write_table(
        dir.path(),
        3,
        &[(ikey(b"z", 0, ValueType::Value), b"z".to_vec())],
    );

    let mut version = empty_version();
    Arc::get_mut(&mut version).unwrap().levels[1].push(l1_a.clone());
    Arc::get_mut(&mut version).unwrap().levels[2].push(l2_overlap.clone());
    Arc::get_mut(&mut version).unwrap().levels[2].push(l2_disjoint);

    let compaction = setup_inputs(version, 1, vec![l1_a], 2 * 1024 * 1024);
    assert_eq!(compaction.inputs[1].len(), 1);
    assert_eq!(compaction.inputs[1][0].number, l2_overlap.number);
    assert!(!compaction.is_trivial_move());
}

#[test]
fn compact_merges_inputs_and_drops_obsolete_versions() {
    let dir = tempdir().unwrap();
    let vs = VersionSet::create_new(dir.path()).unwrap();
    let table_cache = TableCache::new(dir.path(), 10, 1024 * 1024);
    let snapshots = SnapshotList::new();

    let n0 = vs.new_file_number();
    let l0 = write_table(
        dir.path(),
        n0,
        &[
            (ikey(b"a", 2, ValueType::Value), b"new".to_vec()),
            (ikey(b"a", 1, ValueType::Value), b"old".to_vec()),
            (ikey(b"b", 1, ValueType::Deletion), Vec::new()),
        ],
    );
    let mut edit = VersionEdit::new();
    edit.add_file(0, (*l0).clone());
    vs.log_and_apply(edit, None).unwrap();
    vs.set_last_sequence(2);

    let version = vs.current();
    let compaction = setup_inputs(version, 0, vec![l0], 2 * 1024 * 1024);
    assert!(!compaction.is_trivial_move());

    compaction::compact(
        compaction,
        &vs,
        &table_cache,
        &snapshots,
        dir.path(),
        BuildOptions::default(),
    )
    .unwrap();

    let version = vs.current();
    assert!(version.levels[0].is_empty());
    assert_eq!(version.levels[1].len(), 1);

    let out_file = version.levels[1][0].number;
    let lookup = internal_key::lookup_key(b"a", internal_key::MAX_SEQUENCE_NUMBER);
    let (_, value) = table_cache.get(out_file, &lookup).unwrap().expect("key a still present");
    assert_eq!(value, b"new");

    // The older version of "a" and the tombstone for "b" are both
    // collapsed away since there is no snapshot pinning them and level 1
    // is the base level for both keys.
    let mut remaining = Vec::new();
    for item in table_cache.iter_from(out_file, &[]).unwrap() {
        remaining.push(item.unwrap());
    }
    assert_eq!(remaining.len(), 1);
}

#[test]
fn should_stop_before_cuts_on_grandparent_overlap() {
    let dir = tempdir().unwrap();
    let grandparent = write_table(
        dir.path(),
        1,
        &[(ikey(b"a", 1, ValueType::Value), b"x".to_vec())],
    );

    let mut version = empty_version();
    Arc::get_mut(&mut version).unwrap().levels[2].push(grandparent);

    let input = Arc::new(FileMetaData::new(
        2,
        1024,
        ikey(b"a", 1, ValueType::Value),
        ikey(b"z", 1, ValueType::Value),
    ));
    // Force a tiny grandparent-overlap budget via max_file_size=1 so that
    // any grandparent bytes at all trip should_stop_before on the second key.
    let mut compaction = setup_inputs(version, 0, vec![input], 1);
    assert!(!compaction.should_stop_before(&ikey(b"a", 1, ValueType::Value)));
    assert!(compaction.should_stop_before(&ikey(b"z", 1, ValueType::Value)));
}
