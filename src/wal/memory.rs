//! In-memory WAL
//!
//! Keeps records in a vector. Used for journals without a data directory
//! and for exercising replay and write-failure paths.

use crate::error::{JournalError, Result};
use crate::types::Lsn;

use super::{RecordType, Wal, WalRecord};

#[derive(Debug, Default)]
pub struct MemoryWal {
    records: Vec<WalRecord>,
    next_lsn: Lsn,
    /// Number of further writes that succeed before writes start failing
    fail_after: Option<usize>,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_lsn: 1,
            fail_after: None,
        }
    }

    /// Let the next `n` writes succeed, then fail every write
    pub fn fail_after(&mut self, n: usize) {
        self.fail_after = Some(n);
    }

    pub fn records(&self) -> &[WalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in LSN order for replay
    pub fn iter(&self) -> impl Iterator<Item = &WalRecord> {
        self.records.iter()
    }

    /// Count records of a given type
    pub fn count(&self, kind: RecordType) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    pub fn current_lsn(&self) -> Lsn {
        self.next_lsn - 1
    }
}

impl Wal for MemoryWal {
    fn write(&mut self, record: &WalRecord) -> Result<Lsn> {
        if let Some(n) = self.fail_after.as_mut() {
            if *n == 0 {
                return Err(JournalError::WalWrite("injected write failure".to_string()));
            }
            *n -= 1;
        }
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        let mut rec = record.clone();
        rec.lsn = lsn;
        self.records.push(rec);
        Ok(lsn)
    }
}
