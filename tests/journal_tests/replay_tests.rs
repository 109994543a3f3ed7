//! Tests for WAL replay
//!
//! These tests verify:
//! - Replaying a log rebuilds the same journal (segments, counters, rows)
//! - Partial update changesets are patched onto their base rows
//! - Records of other entities are ignored
//! - Rid, pk and capacity mismatches stop replay

use std::collections::BTreeMap;
use std::sync::Arc;

use mvjournal::codec::put_uvarint;
use mvjournal::filter::FilterNode;
use mvjournal::journal::{EmptyTable, Journal, TableReader, WriteCtx};
use mvjournal::pack::{DataPack, RowMeta};
use mvjournal::types::{Rid, Snapshot, TableState, Xid};
use mvjournal::wal::{MemoryWal, RecordType, Wal, WalRecord};
use mvjournal::{Field, FieldType, JournalError, Result, Schema, Value};

// =============================================================================
// Helper Functions
// =============================================================================

const ENTITY: u64 = 1;

fn setup_schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(
            "replay",
            vec![
                Field::new("id", FieldType::U64),
                Field::new("name", FieldType::Bytes),
                Field::new("value", FieldType::I64),
            ],
        )
        .unwrap(),
    )
}

fn setup_journal(maxsz: usize) -> Journal {
    Journal::new(setup_schema(), ENTITY, maxsz, 64)
}

fn row(pk: u64, name: &str, value: i64) -> Vec<Value> {
    vec![
        Value::U64(pk),
        Value::Bytes(name.as_bytes().to_vec()),
        Value::I64(value),
    ]
}

fn encode(journal: &Journal, rows: &[Vec<Value>]) -> Vec<u8> {
    journal.schema().encode_rows(rows).unwrap()
}

/// Source pack replacing version `rid`; only `value` is dirty
fn set_value(journal: &Journal, rid: Rid, base: Vec<Value>, value: i64) -> DataPack {
    let mut pack = DataPack::new(journal.schema().clone(), 1);
    let meta = RowMeta {
        rid,
        ref_id: rid,
        ..RowMeta::default()
    };
    pack.append_row(base, meta).unwrap();
    pack.update_value(2, 0, Value::I64(value)).unwrap();
    pack
}

fn commit(journal: &mut Journal, wal: &mut MemoryWal, xid: Xid) {
    wal.write(&WalRecord::new(RecordType::Commit, ENTITY, xid, Vec::new()))
        .unwrap();
    journal.commit_tx(xid);
}

fn abort(journal: &mut Journal, wal: &mut MemoryWal, xid: Xid) {
    journal.abort_tx(xid);
    wal.write(&WalRecord::new(RecordType::Abort, ENTITY, xid, Vec::new()))
        .unwrap();
}

fn replay_all(journal: &mut Journal, wal: &MemoryWal) -> Result<()> {
    for rec in wal.iter() {
        journal.replay_wal_record(rec, &EmptyTable)?;
    }
    Ok(())
}

fn visible(journal: &Journal, snap: &Snapshot) -> BTreeMap<u64, Vec<Value>> {
    journal
        .query(&FilterNode::All, snap, 0)
        .rows()
        .into_iter()
        .map(|r| (r[0].as_u64().unwrap(), r))
        .collect()
}

fn segment_shape(journal: &Journal) -> Vec<(u32, u64, usize, usize)> {
    journal
        .segments()
        .map(|s| (s.id(), s.checkpoint(), s.data().len(), s.tomb().len()))
        .collect()
}

/// Mixed history over several segments: inserts, a partial and a full
/// update, deletes, one aborted and one unfinished transaction.
fn setup_history(journal: &mut Journal, wal: &mut MemoryWal) {
    let buf = encode(journal, &[row(0, "a", 1), row(0, "b", 2), row(0, "c", 3)]);
    journal
        .insert_records(&mut WriteCtx::new(1, wal), &buf)
        .unwrap();
    commit(journal, wal, 1);

    {
        let src = set_value(journal, 2, row(2, "b", 2), 20);
        let mut ctx = WriteCtx::new(2, wal);
        journal.update_pack(&mut ctx, &src).unwrap();
        journal.delete_rids(&mut ctx, &[1]).unwrap();
        let buf = encode(journal, &[row(0, "d", 4), row(0, "e", 5)]);
        journal.insert_records(&mut ctx, &buf).unwrap();
    }
    commit(journal, wal, 2);

    {
        let buf = encode(journal, &[row(0, "x", 9)]);
        let mut ctx = WriteCtx::new(3, wal);
        journal.insert_records(&mut ctx, &buf).unwrap();
        journal.delete_rids(&mut ctx, &[3]).unwrap();
    }
    abort(journal, wal, 3);

    {
        let mut src = DataPack::new(journal.schema().clone(), 1);
        let meta = RowMeta {
            rid: 3,
            ref_id: 3,
            ..RowMeta::default()
        };
        src.append_row(row(3, "c2", 30), meta).unwrap();
        src.set_all_dirty();
        let mut ctx = WriteCtx::new(4, wal);
        journal.update_pack(&mut ctx, &src).unwrap();
    }
    commit(journal, wal, 4);

    let buf = encode(journal, &[row(0, "open", 7)]);
    journal
        .insert_records(&mut WriteCtx::new(5, wal), &buf)
        .unwrap();
}

// =============================================================================
// Replay Equivalence Tests
// =============================================================================

#[test]
fn test_replay_rebuilds_journal() {
    let mut journal = setup_journal(3);
    let mut wal = MemoryWal::new();
    setup_history(&mut journal, &mut wal);
    assert!(wal.count(RecordType::Checkpoint) > 0);

    let mut replayed = setup_journal(3);
    replay_all(&mut replayed, &wal).unwrap();

    assert_eq!(replayed.state(), journal.state());
    assert_eq!(segment_shape(&replayed), segment_shape(&journal));
    let snap = Snapshot::committed(5);
    assert_eq!(visible(&replayed, &snap), visible(&journal, &snap));
    let own = Snapshot::new(5, 6, std::iter::empty());
    assert_eq!(visible(&replayed, &own), visible(&journal, &own));
}

#[test]
fn test_replay_then_abort_active() {
    let mut journal = setup_journal(3);
    let mut wal = MemoryWal::new();
    setup_history(&mut journal, &mut wal);

    let mut replayed = setup_journal(3);
    replay_all(&mut replayed, &wal).unwrap();
    assert_eq!(replayed.abort_active_tx(), vec![5]);
    journal.abort_tx(5);

    assert_eq!(replayed.state(), journal.state());
    let rows = visible(&replayed, &Snapshot::committed(6));
    let names: Vec<Vec<Value>> = rows.into_values().collect();
    assert_eq!(
        names,
        vec![
            row(2, "b", 20),
            row(3, "c2", 30),
            row(4, "d", 4),
            row(5, "e", 5)
        ]
    );
}

#[test]
fn test_replay_partial_update_from_table() {
    struct OneRow(Vec<u8>);

    impl TableReader for OneRow {
        fn read_wire(&self, rid: Rid) -> Result<Option<Vec<u8>>> {
            Ok((rid == 7).then(|| self.0.clone()))
        }
    }

    let state = TableState {
        next_pk: 10,
        next_rid: 10,
        n_rows: 9,
    };
    let mut journal = setup_journal(8).with_state(state);
    let mut wal = MemoryWal::new();
    let src = set_value(&journal, 7, row(7, "seven", 70), 71);
    journal
        .update_pack(&mut WriteCtx::new(1, &mut wal), &src)
        .unwrap();

    let base = encode(&journal, &[row(7, "seven", 70)]);
    let mut replayed = setup_journal(8).with_state(state);
    let err = replayed
        .replay_wal_record(&wal.records()[0], &EmptyTable)
        .unwrap_err();
    assert!(matches!(err, JournalError::Decode(_)));

    let mut replayed = setup_journal(8).with_state(state);
    replayed
        .replay_wal_record(&wal.records()[0], &OneRow(base))
        .unwrap();
    let own = Snapshot::new(1, 2, std::iter::empty());
    assert_eq!(
        visible(&replayed, &own).get(&7),
        Some(&row(7, "seven", 71))
    );
}

#[test]
fn test_replay_ignores_other_entities() {
    let mut journal = setup_journal(8);
    let mut payload = Vec::new();
    put_uvarint(&mut payload, 99);
    let rec = WalRecord::new(RecordType::Insert, ENTITY + 1, 1, payload);

    journal.replay_wal_record(&rec, &EmptyTable).unwrap();
    assert_eq!(journal.state(), TableState::new());
}

// =============================================================================
// Mismatch Tests
// =============================================================================

#[test]
fn test_replay_rid_mismatch() {
    let mut journal = setup_journal(8);
    let mut wal = MemoryWal::new();
    let buf = encode(&journal, &[row(0, "a", 1)]);
    journal
        .insert_records(&mut WriteCtx::new(1, &mut wal), &buf)
        .unwrap();

    let mut replayed = setup_journal(8).with_state(TableState {
        next_pk: 5,
        next_rid: 5,
        n_rows: 4,
    });
    let err = replayed
        .replay_wal_record(&wal.records()[0], &EmptyTable)
        .unwrap_err();
    assert!(matches!(
        err,
        JournalError::RidMismatch {
            expected: 5,
            found: 1
        }
    ));
}

#[test]
fn test_replay_pk_mismatch() {
    let mut journal = setup_journal(8);
    let mut payload = Vec::new();
    put_uvarint(&mut payload, 1);
    payload.extend_from_slice(&encode(&journal, &[row(7, "a", 1)]));
    let rec = WalRecord::new(RecordType::Insert, ENTITY, 1, payload);

    let err = journal.replay_wal_record(&rec, &EmptyTable).unwrap_err();
    assert!(matches!(
        err,
        JournalError::PkMismatch {
            expected: 1,
            found: 7
        }
    ));
}

#[test]
fn test_replay_capacity_exceeded() {
    let mut journal = setup_journal(2);
    let mut payload = Vec::new();
    put_uvarint(&mut payload, 1);
    payload.extend_from_slice(&encode(
        &journal,
        &[row(1, "a", 1), row(2, "b", 2), row(3, "c", 3)],
    ));
    let rec = WalRecord::new(RecordType::Insert, ENTITY, 1, payload);

    let err = journal.replay_wal_record(&rec, &EmptyTable).unwrap_err();
    assert!(matches!(
        err,
        JournalError::Capacity {
            need: 3,
            available: 2
        }
    ));
    assert_eq!(journal.state(), TableState::new());
}

#[test]
fn test_replay_truncated_payload() {
    let mut journal = setup_journal(8);
    let mut payload = Vec::new();
    put_uvarint(&mut payload, 1);
    let wire = encode(&journal, &[row(1, "abc", 1)]);
    payload.extend_from_slice(&wire[..wire.len() - 3]);
    let rec = WalRecord::new(RecordType::Insert, ENTITY, 1, payload);

    assert!(journal.replay_wal_record(&rec, &EmptyTable).is_err());
}
