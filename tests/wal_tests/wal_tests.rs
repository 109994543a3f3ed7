//! Tests for the WAL
//!
//! These tests verify:
//! - Record framing and checksum detection
//! - Writer LSN assignment and continuation after reopen
//! - Reader iteration in LSN order
//! - Recovery from clean, torn and corrupted logs
//! - Verify mode (stats only, file untouched)
//! - In-memory WAL failure injection

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use mvjournal::wal::{MemoryWal, RecordType, Wal, WalReader, WalRecord, WalRecovery, WalWriter, HEADER_SIZE};
use mvjournal::JournalError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("test.wal");
    (temp_dir, wal_path)
}

fn insert_record(xid: u64, payload: &[u8]) -> WalRecord {
    WalRecord::new(RecordType::Insert, 7, xid, payload.to_vec())
}

/// Write records using WalWriter (produces a well-formed WAL)
fn write_records_via_writer(path: &PathBuf, count: usize) {
    let mut writer = WalWriter::open(path).unwrap();
    for i in 0..count {
        writer
            .append(&insert_record(1, format!("payload{}", i).as_bytes()))
            .unwrap();
    }
    writer.sync().unwrap();
}

fn append_raw(path: &PathBuf, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Record Framing Tests
// =============================================================================

#[test]
fn test_record_frame_roundtrip() {
    let mut record = WalRecord::new(RecordType::Update, 3, 42, vec![1, 2, 3]);
    record.lsn = 9;
    let frame = record.serialize().unwrap();

    assert_eq!(u64::from_le_bytes(frame[0..8].try_into().unwrap()), 9);
    let (decoded, consumed) = WalRecord::deserialize(&frame).unwrap();
    assert_eq!(consumed, frame.len());
    assert_eq!(decoded, record);
}

#[test]
fn test_record_short_header() {
    let err = WalRecord::deserialize(&[0u8; HEADER_SIZE - 1]).unwrap_err();
    assert!(matches!(err, JournalError::ShortBuffer { .. }));
}

#[test]
fn test_record_short_body() {
    let frame = insert_record(1, b"abcdef").serialize().unwrap();
    let err = WalRecord::deserialize(&frame[..frame.len() - 1]).unwrap_err();
    assert!(matches!(err, JournalError::ShortBuffer { .. }));
}

#[test]
fn test_record_checksum_mismatch() {
    let mut frame = insert_record(1, b"abcdef").serialize().unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    let err = WalRecord::deserialize(&frame).unwrap_err();
    assert!(matches!(err, JournalError::WalCorruption(_)));
}

// =============================================================================
// Writer / Reader Tests
// =============================================================================

#[test]
fn test_writer_assigns_increasing_lsns() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path).unwrap();

    assert_eq!(writer.current_lsn(), 0);
    assert_eq!(writer.append(&insert_record(1, b"a")).unwrap(), 1);
    assert_eq!(writer.write(&insert_record(1, b"b")).unwrap(), 2);
    assert_eq!(writer.current_lsn(), 2);
}

#[test]
fn test_writer_reopen_continues_lsn() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 3);

    let mut writer = WalWriter::open(&wal_path).unwrap();
    assert_eq!(writer.current_lsn(), 3);
    assert_eq!(writer.append(&insert_record(2, b"x")).unwrap(), 4);
}

#[test]
fn test_reader_iterates_in_order() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 5);

    let records: Vec<WalRecord> = WalReader::open(&wal_path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records.len(), 5);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.lsn, i as u64 + 1);
        assert_eq!(rec.entity, 7);
        assert_eq!(rec.payload, format!("payload{}", i).into_bytes());
    }
}

// =============================================================================
// Recover: Clean WAL Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert!(records.is_empty());
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_multiple_records() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 10);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 10);
    assert_eq!(result.entries_recovered, 10);
    assert_eq!(result.last_lsn, 10);
    assert!(!result.was_truncated);
}

// =============================================================================
// Recover: Partial Write Tests (was_truncated = true)
// =============================================================================

#[test]
fn test_recover_partial_header_at_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 2);
    let good_len = std::fs::metadata(&wal_path).unwrap().len();
    append_raw(&wal_path, &[0u8; 8]);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(result.entries_corrupted, 0);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), good_len);
}

#[test]
fn test_recover_partial_body_at_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 1);
    let mut torn = insert_record(1, b"this body is cut short").serialize().unwrap();
    torn.truncate(HEADER_SIZE + 4);
    append_raw(&wal_path, &torn);

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.entries_corrupted, 0);
    assert!(result.was_truncated);

    // appends continue after the last good record
    let mut writer = WalWriter::open(&wal_path).unwrap();
    assert_eq!(writer.append(&insert_record(2, b"next")).unwrap(), 2);
    let (records, _) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].payload, b"next".to_vec());
}

#[test]
fn test_recover_corrupted_record() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 1);
    let mut bad = insert_record(1, b"corrupt me").serialize().unwrap();
    bad[HEADER_SIZE + 2] ^= 0xFF;
    append_raw(&wal_path, &bad);
    append_raw(&wal_path, &insert_record(1, b"after").serialize().unwrap());

    let (records, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_does_not_modify_file() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 3);
    append_raw(&wal_path, &[0u8; 5]);
    let len = std::fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 3);
    assert!(result.was_truncated);
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), len);
}

#[test]
fn test_recover_and_verify_agree() {
    let (_temp, wal_path) = setup_temp_wal();
    write_records_via_writer(&wal_path, 4);
    append_raw(&wal_path, &[1u8; 3]);

    let verify_result = WalRecovery::verify(&wal_path).unwrap();
    let (_, recover_result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(verify_result, recover_result);
}

// =============================================================================
// Memory WAL Tests
// =============================================================================

#[test]
fn test_memory_wal_counts_and_lsns() {
    let mut wal = MemoryWal::new();
    assert_eq!(wal.write(&insert_record(1, b"a")).unwrap(), 1);
    assert_eq!(
        wal.write(&WalRecord::new(RecordType::Commit, 7, 1, Vec::new()))
            .unwrap(),
        2
    );

    assert_eq!(wal.len(), 2);
    assert_eq!(wal.count(RecordType::Insert), 1);
    assert_eq!(wal.count(RecordType::Commit), 1);
    assert_eq!(wal.current_lsn(), 2);
    assert_eq!(wal.records()[1].lsn, 2);
}

#[test]
fn test_memory_wal_fail_after() {
    let mut wal = MemoryWal::new();
    wal.fail_after(1);

    assert!(wal.write(&insert_record(1, b"a")).is_ok());
    let err = wal.write(&insert_record(1, b"b")).unwrap_err();
    assert!(matches!(err, JournalError::WalWrite(_)));
    assert_eq!(wal.len(), 1);
}
