use crate::internal_key::{self, ValueType};
use crate::merge_iter::{MergeItem, MergingIter};

fn child(entries: Vec<(&'static [u8], u64, &'static [u8])>) -> Box<dyn Iterator<Item = MergeItem>> {
    Box::new(entries.into_iter().map(|(k, seq, v)| {
        Ok((internal_key::build(k, seq, ValueType::Value), v.to_vec()))
    }))
}

#[test]
fn merges_two_children_in_ascending_order() {
    let a = child(vec![(b"a", 5, b"a5"), (b"c", 5, b"c5")]);
    let b = child(vec![(b"b", 5, b"b5"), (b"d", 5, b"d5")]);
    let merged: Vec<_> = MergingIter::new(vec![a, b])
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let user_keys: Vec<&[u8]> = merged.iter().map(|(k, _)| internal_key::user_key(k)).collect();
    assert_eq!(user_keys, vec![b"a".as_slice(), b"b", b"c", b"d"]);
}

#[test]
fn emits_both_versions_of_equal_user_key_newest_tail_first() {
    let a = child(vec![(b"a", 7, b"new")]);
    let b = child(vec![(b"a", 3, b"old")]);
    let merged: Vec<_> = MergingIter::new(vec![a, b])
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].1, b"new");
    assert_eq!(merged[1].1, b"old");
}

#[test]
fn empty_children_yield_empty_merge() {
    let merged: Vec<_> = MergingIter::new(Vec::<Box<dyn Iterator<Item = MergeItem>>>::new())
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(merged.is_empty());
}
