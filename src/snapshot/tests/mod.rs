use crate::snapshot::SnapshotList;

#[test]
fn no_snapshots_reports_last_sequence() {
    let list = SnapshotList::new();
    assert_eq!(list.smallest(42), 42);
}

#[test]
fn smallest_tracks_oldest_outstanding_snapshot() {
    let list = SnapshotList::new();
    let s1 = list.acquire(5);
    let s2 = list.acquire(10);
    assert_eq!(list.smallest(100), 5);
    drop(s1);
    assert_eq!(list.smallest(100), 10);
    drop(s2);
    assert_eq!(list.smallest(100), 100);
}

#[test]
fn duplicate_sequence_refcounts_correctly() {
    let list = SnapshotList::new();
    let s1 = list.acquire(7);
    let s2 = list.acquire(7);
    assert_eq!(list.smallest(100), 7);
    drop(s1);
    assert_eq!(list.smallest(100), 7);
    drop(s2);
    assert_eq!(list.smallest(100), 100);
}
