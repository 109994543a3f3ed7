//! WAL Replay
//!
//! Rebuilds journal state from WAL records in log order. Each record is
//! applied exactly as the write path applied it. Any mismatch between the
//! log and the rebuilt counters is fatal: it means a corrupt log or a
//! WAL-disabled write in between.

use tracing::debug;

use crate::bitset::Bitset;
use crate::codec::{ensure_remaining, get_uvarint};
use crate::error::{JournalError, Result};
use crate::types::Rid;
use crate::wal::{RecordType, WalRecord};

use super::Journal;

/// Read access to rows already merged into table storage
pub trait TableReader {
    /// Wire encoding of row version `rid`, `None` if unknown
    fn read_wire(&self, rid: Rid) -> Result<Option<Vec<u8>>>;
}

/// Table without merged rows
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTable;

impl TableReader for EmptyTable {
    fn read_wire(&self, _rid: Rid) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

impl Journal {
    /// Apply one WAL record. Records of other entities are ignored.
    pub fn replay_wal_record(&mut self, rec: &WalRecord, table: &dyn TableReader) -> Result<()> {
        if rec.entity != self.entity {
            return Ok(());
        }
        match rec.kind {
            RecordType::Commit => {
                self.commit_tx(rec.xid);
            }
            RecordType::Abort => {
                self.abort_tx(rec.xid);
            }
            RecordType::Checkpoint => {
                if self.tip.len() > 0 {
                    self.do_rotate();
                }
                self.tip.set_checkpoint(rec.lsn);
            }
            RecordType::Insert => self.replay_insert(rec)?,
            RecordType::Update => self.replay_update(rec, table)?,
            RecordType::Delete => self.replay_delete(rec)?,
        }
        Ok(())
    }

    fn check_next_rid(&self, first_rid: Rid) -> Result<()> {
        let expected = self.tip.tstate.next_rid;
        if first_rid != expected {
            return Err(JournalError::RidMismatch {
                expected,
                found: first_rid,
            });
        }
        Ok(())
    }

    fn check_capacity(&self, need: usize) -> Result<()> {
        let available = self.capacity();
        if need > available {
            return Err(JournalError::Capacity { need, available });
        }
        Ok(())
    }

    fn replay_insert(&mut self, rec: &WalRecord) -> Result<()> {
        let mut buf = rec.payload.as_slice();
        let first_rid = get_uvarint(&mut buf)?;
        self.check_next_rid(first_rid)?;

        let mut rows = Vec::new();
        while !buf.is_empty() {
            let (wire, rest) = self.schema.cut(buf)?;
            rows.push(wire);
            buf = rest;
        }
        self.check_capacity(rows.len())?;

        for wire in &rows {
            let pk = self.schema.get_pk(wire)?;
            let state = self.tip.tstate;
            if pk != state.next_pk {
                return Err(JournalError::PkMismatch {
                    expected: state.next_pk,
                    found: pk,
                });
            }
            self.tip.insert_record(rec.xid, state.next_rid, wire)?;
            let tstate = &mut self.tip.tstate;
            tstate.next_pk += 1;
            tstate.next_rid += 1;
            tstate.n_rows += 1;
        }
        debug!(lsn = rec.lsn, xid = rec.xid, n = rows.len(), "replayed insert");
        Ok(())
    }

    fn replay_update(&mut self, rec: &WalRecord, table: &dyn TableReader) -> Result<()> {
        let nfields = self.schema.num_fields();
        let nbytes = (nfields + 7) / 8;
        let mut buf = rec.payload.as_slice();
        ensure_remaining(&buf, nbytes)?;
        let changed: Vec<usize> = Bitset::from_bytes(&buf[..nbytes], nfields)
            .iter_ones()
            .collect();
        let full = changed.len() == nfields;
        buf = &buf[nbytes..];

        let first_rid = get_uvarint(&mut buf)?;
        self.check_next_rid(first_rid)?;

        let mut items = Vec::new();
        while !buf.is_empty() {
            let ref_id = get_uvarint(&mut buf)?;
            let len = if full {
                self.schema.record_len(buf)?
            } else {
                self.schema.fields_len(buf, &changed)?
            };
            items.push((ref_id, &buf[..len]));
            buf = &buf[len..];
        }
        self.check_capacity(items.len())?;

        for (ref_id, part) in &items {
            let wire = if full {
                part.to_vec()
            } else {
                let base = match self.read_wire(*ref_id) {
                    Some(base) => base,
                    None => table.read_wire(*ref_id)?.ok_or_else(|| {
                        JournalError::Decode(format!("update base row {} not found", ref_id))
                    })?,
                };
                self.schema.patch_fields(&base, part, &changed)?
            };
            let rid = self.tip.tstate.next_rid;
            self.tip.update_record(rec.xid, rid, *ref_id, &wire)?;
            self.tip.tstate.next_rid += 1;
        }
        debug!(lsn = rec.lsn, xid = rec.xid, n = items.len(), full, "replayed update");
        Ok(())
    }

    fn replay_delete(&mut self, rec: &WalRecord) -> Result<()> {
        let mut buf = rec.payload.as_slice();
        let mut rids = Vec::new();
        while !buf.is_empty() {
            rids.push(get_uvarint(&mut buf)?);
        }
        self.check_capacity(rids.len())?;

        for &rid in &rids {
            self.tip.notify_delete(rec.xid, rid);
            self.tip.tstate.apply_rows_diff(-1);
        }
        debug!(lsn = rec.lsn, xid = rec.xid, n = rids.len(), "replayed delete");
        Ok(())
    }
}
