//! Tests for journal segments
//!
//! These tests verify:
//! - Row and tombstone bookkeeping on insert, update and delete
//! - Capacity accounting
//! - Commit resolution of the open writer
//! - Snapshot-filtered matching on the quick and the general path
//! - Deleted-rid merging

use std::sync::Arc;

use mvjournal::bitset::Bitset;
use mvjournal::filter::{CmpOp, FilterNode};
use mvjournal::journal::{Segment, SegmentState};
use mvjournal::types::{RidSet, Snapshot};
use mvjournal::{Field, FieldType, Schema, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(
            "seg",
            vec![
                Field::new("id", FieldType::U64),
                Field::new("value", FieldType::I64),
            ],
        )
        .unwrap(),
    )
}

fn wire(schema: &Schema, pk: u64, value: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    schema
        .encode_row(&[Value::U64(pk), Value::I64(value)], &mut buf)
        .unwrap();
    buf
}

/// Segment with rows rid 1..=n (pk = rid) written and committed by xid 1
fn setup_committed(n: u64, maxsz: usize) -> Segment {
    let schema = setup_schema();
    let mut seg = Segment::new(schema.clone(), 1, maxsz);
    for rid in 1..=n {
        seg.insert_record(1, rid, &wire(&schema, rid, rid as i64 * 10))
            .unwrap();
    }
    assert!(seg.commit_tx(1));
    seg
}

fn matched(seg: &Segment, node: &FilterNode, snap: &Snapshot, mask: &RidSet) -> Vec<usize> {
    let mut bits = Bitset::new(0);
    seg.match_rows(node, snap, mask, &mut bits);
    assert_eq!(bits.len(), seg.data().len());
    bits.iter_ones().collect()
}

// =============================================================================
// Write Path Tests
// =============================================================================

#[test]
fn test_insert_tracks_ranges_and_capacity() {
    let schema = setup_schema();
    let mut seg = Segment::new(schema.clone(), 1, 4);
    assert_eq!(seg.state(), SegmentState::Active);
    assert!(seg.is_empty());

    for rid in 1..=3 {
        seg.insert_record(7, rid, &wire(&schema, rid, 0)).unwrap();
    }

    assert_eq!(seg.len(), 3);
    assert_eq!(seg.capacity(), 1);
    assert!(!seg.is_full());
    assert_eq!(seg.rid_range(), (1, 3));
    assert_eq!(seg.xid_range(), (7, 7));
    assert_eq!(seg.active_tx(), 7);
    assert!(seg.contains_tx(7));
    assert_eq!(seg.n_insert(), 3);
    assert_eq!(seg.find_row(2), Some(1));
    assert_eq!(seg.find_row(9), None);

    seg.insert_record(7, 4, &wire(&schema, 4, 0)).unwrap();
    assert!(seg.is_full());
    assert_eq!(seg.capacity(), 0);
}

#[test]
fn test_update_in_same_segment_replaces_prior_row() {
    let schema = setup_schema();
    let mut seg = setup_committed(1, 8);
    let post = wire(&schema, 1, 99);

    seg.update_record(2, 2, 1, &post).unwrap();

    assert_eq!(seg.data().len(), 2);
    assert_eq!(seg.data().xmax(0), 2);
    assert_eq!(seg.data().ref_id(1), 1);
    assert_eq!(seg.n_update(), 1);
    assert_eq!(seg.tomb().len(), 1);
    assert!(!seg.tomb().stones()[0].is_delete);
    assert_eq!(seg.read_wire(2), Some(post));
}

#[test]
fn test_delete_marks_own_rows_only() {
    let mut seg = setup_committed(2, 8);

    seg.notify_delete(2, 1);
    seg.notify_delete(2, 50);

    assert!(seg.data().is_deleted(0));
    assert_eq!(seg.data().xmax(0), 2);
    assert!(!seg.data().is_deleted(1));
    assert_eq!(seg.n_delete(), 2);
    assert_eq!(seg.tomb().num_deletes(), 2);
    assert!(seg.tomb().contains(50));
    // tombstones count against capacity independently of rows
    assert_eq!(seg.len(), 4);
    assert_eq!(seg.capacity(), 6);
}

#[test]
fn test_commit_resolves_writer_once() {
    let schema = setup_schema();
    let mut seg = Segment::new(schema.clone(), 1, 8);
    seg.insert_record(3, 1, &wire(&schema, 1, 0)).unwrap();

    assert!(!seg.commit_tx(2));
    assert!(seg.commit_tx(3));
    assert!(seg.is_done());
    assert!(!seg.commit_tx(3));
}

// =============================================================================
// Match Tests
// =============================================================================

#[test]
fn test_match_hides_uncommitted_rows() {
    let schema = setup_schema();
    let mut seg = setup_committed(3, 8);
    seg.insert_record(2, 4, &wire(&schema, 4, 40)).unwrap();

    let reader = Snapshot::new(0, 3, [2]);
    assert_eq!(matched(&seg, &FilterNode::All, &reader, &RidSet::new()), vec![0, 1, 2]);

    let writer = Snapshot::new(2, 3, std::iter::empty());
    assert_eq!(matched(&seg, &FilterNode::All, &writer, &RidSet::new()), vec![0, 1, 2, 3]);
}

#[test]
fn test_match_applies_mask_and_predicate() {
    let seg = setup_committed(4, 8);
    let snap = Snapshot::committed(5);
    let mask: RidSet = [2u64].into_iter().collect();

    let node = FilterNode::cmp(1, CmpOp::Ge, Value::I64(20));
    assert_eq!(matched(&seg, &node, &snap, &mask), vec![2, 3]);
}

#[test]
fn test_match_quick_path_boundary() {
    let mut seg = setup_committed(3, 8);
    seg.notify_delete(2, 3);
    assert!(seg.commit_tx(2));
    assert_eq!(seg.xid_range(), (1, 2));

    // xmin above the segment's xmax: settled, the delete flag applies
    let settled = Snapshot::new(0, 3, std::iter::empty());
    assert_eq!(matched(&seg, &FilterNode::All, &settled, &RidSet::new()), vec![0, 1]);

    // xmin equal to the segment's xmax: the delete is not yet visible
    let older = Snapshot::new(0, 2, std::iter::empty());
    assert_eq!(matched(&seg, &FilterNode::All, &older, &RidSet::new()), vec![0, 1, 2]);
}

#[test]
fn test_match_future_segment_is_empty() {
    let schema = setup_schema();
    let mut seg = Segment::new(schema.clone(), 1, 8);
    seg.insert_record(5, 1, &wire(&schema, 1, 0)).unwrap();

    let snap = Snapshot::committed(5);
    assert!(matched(&seg, &FilterNode::All, &snap, &RidSet::new()).is_empty());
}

// =============================================================================
// Deleted Merge Tests
// =============================================================================

#[test]
fn test_merge_deleted_respects_snapshot() {
    let mut seg = setup_committed(3, 8);
    seg.notify_delete(2, 1);
    seg.commit_tx(2);
    seg.notify_delete(4, 2);

    let mut before = RidSet::new();
    seg.merge_deleted(&mut before, &Snapshot::committed(2));
    assert!(before.is_empty());

    let mut mid = RidSet::new();
    seg.merge_deleted(&mut mid, &Snapshot::new(0, 5, [4]));
    assert_eq!(mid.iter().collect::<Vec<_>>(), vec![1]);

    let mut own = RidSet::new();
    seg.merge_deleted(&mut own, &Snapshot::new(4, 5, [4]));
    assert_eq!(own.iter().collect::<Vec<_>>(), vec![1, 2]);
}
