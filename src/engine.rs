//! Engine Module
//!
//! Table-level driver that owns the journal, the WAL and the table store.
//!
//! ## Responsibilities
//! - Issue transaction ids and snapshots
//! - Enforce the single active writer
//! - Route writes through the journal with or without WAL
//! - Merge complete journal segments into the table store
//! - Replay the WAL on startup and roll back unfinished transactions

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{JournalError, Result};
use crate::filter::FilterNode;
use crate::journal::{Journal, TableReader, WriteCtx};
use crate::pack::{DataPack, RowMeta};
use crate::schema::{Row, Schema, Value};
use crate::table::TableStore;
use crate::types::{Lsn, Rid, SegmentId, Snapshot, Xid};
use crate::wal::{RecordType, WalRecord, WalRecovery, WalWriter};

/// A read or write transaction handle
#[derive(Debug, Clone)]
pub struct Tx {
    xid: Xid,
    snap: Snapshot,
    writable: bool,
    use_wal: bool,
}

impl Tx {
    /// Transaction id, 0 for readers
    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snap
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn use_wal(&self) -> bool {
        self.use_wal
    }
}

/// Engine counters for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub segments: usize,
    pub journal_records: usize,
    pub live_rows: usize,
    pub table_rows: usize,
    pub epoch: SegmentId,
    pub next_xid: Xid,
    pub next_pk: u64,
    pub last_lsn: Lsn,
}

#[derive(Debug)]
struct TxState {
    next_xid: Xid,
    writer: Option<Xid>,
}

/// The journaled table engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** take the journal write lock, then the WAL lock. Only the
///   transaction registered as writer may write.
/// - **Reads** take the journal read lock for the duration of a query and
///   return owned rows.
pub struct Engine {
    /// Engine configuration
    config: Config,

    schema: Arc<Schema>,

    /// Journal of pending writes
    journal: RwLock<Journal>,

    /// Rows of merged segments
    table: TableStore,

    /// Write-ahead log (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// Transaction id issuer and active writer
    txs: Mutex<TxState>,
}

impl Engine {
    const WAL_FILENAME: &'static str = "journal.wal";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Replay the WAL into a fresh journal
    /// 3. Abort and log transactions left open by a crash
    /// 4. Merge complete segments into the table store
    pub fn open(config: Config, schema: Schema) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let schema = Arc::new(schema);
        let wal_path = Self::wal_path(&config);
        let table = TableStore::new(schema.clone());
        let mut journal = Journal::from_config(schema.clone(), &config);

        let mut max_xid = 0;
        let mut last_lsn = 0;
        if wal_path.exists() {
            let (records, result) = WalRecovery::recover(&wal_path)?;
            info!(
                recovered = result.entries_recovered,
                corrupted = result.entries_corrupted,
                last_lsn = result.last_lsn,
                truncated = result.was_truncated,
                "WAL recovery"
            );
            for rec in &records {
                journal.replay_wal_record(rec, &table)?;
                max_xid = max_xid.max(rec.xid);
            }
            last_lsn = result.last_lsn;
        }

        let mut wal = WalWriter::open_at(&wal_path, last_lsn)?;
        let aborted = journal.abort_active_tx();
        for &xid in &aborted {
            wal.append(&WalRecord::new(RecordType::Abort, config.entity, xid, Vec::new()))?;
        }
        if !aborted.is_empty() {
            info!(?aborted, "rolled back unfinished transactions");
        }

        let engine = Self {
            config,
            schema,
            journal: RwLock::new(journal),
            table,
            wal: Mutex::new(wal),
            txs: Mutex::new(TxState {
                next_xid: max_xid + 1,
                writer: None,
            }),
        };
        engine.merge()?;
        Ok(engine)
    }

    fn wal_path(config: &Config) -> PathBuf {
        config.data_dir.join(Self::WAL_FILENAME)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a reader; sees everything committed so far
    pub fn begin_read(&self) -> Tx {
        let txs = self.txs.lock();
        Tx {
            xid: 0,
            snap: Snapshot::new(0, txs.next_xid, txs.writer),
            writable: false,
            use_wal: false,
        }
    }

    /// Start a writer using the configured WAL mode
    pub fn begin_write(&self) -> Result<Tx> {
        self.begin_write_with(self.config.use_wal)
    }

    /// Start a writer. Fails with `WriterBusy` while another writer is open.
    ///
    /// Committed writes made with `use_wal = false` are not recoverable and
    /// make later WAL replay fail with a rid mismatch.
    pub fn begin_write_with(&self, use_wal: bool) -> Result<Tx> {
        let mut txs = self.txs.lock();
        if let Some(xid) = txs.writer {
            return Err(JournalError::WriterBusy(xid));
        }
        let xid = txs.next_xid;
        txs.next_xid += 1;
        txs.writer = Some(xid);
        debug!(xid, use_wal, "begin write");
        Ok(Tx {
            xid,
            snap: Snapshot::new(xid, txs.next_xid, std::iter::empty()),
            writable: true,
            use_wal,
        })
    }

    fn check_writer(&self, tx: &Tx) -> Result<()> {
        if !tx.writable || self.txs.lock().writer != Some(tx.xid) {
            return Err(JournalError::ReadOnly(tx.xid));
        }
        Ok(())
    }

    fn release(&self, xid: Xid) {
        let mut txs = self.txs.lock();
        if txs.writer == Some(xid) {
            txs.writer = None;
        }
    }

    /// Run a journal write for `tx`, wiring the WAL when enabled
    fn with_journal<R, F>(&self, tx: &Tx, f: F) -> Result<R>
    where
        F: FnOnce(&mut Journal, &mut WriteCtx<'_>) -> Result<R>,
    {
        self.check_writer(tx)?;
        let mut journal = self.journal.write();
        if tx.use_wal {
            let mut wal = self.wal.lock();
            let mut ctx = WriteCtx::new(tx.xid, &mut *wal);
            f(&mut *journal, &mut ctx)
        } else {
            let mut ctx = WriteCtx::without_wal(tx.xid);
            f(&mut *journal, &mut ctx)
        }
    }

    /// Commit a writer. Readers commit trivially.
    pub fn commit(&self, tx: &Tx) -> Result<()> {
        if !tx.writable {
            return Ok(());
        }
        self.check_writer(tx)?;
        if tx.use_wal {
            self.wal.lock().append(&WalRecord::new(
                RecordType::Commit,
                self.config.entity,
                tx.xid,
                Vec::new(),
            ))?;
        }
        let (_, force_merge) = self.journal.write().commit_tx(tx.xid);
        self.release(tx.xid);
        debug!(xid = tx.xid, "commit");
        if force_merge {
            self.merge()?;
        }
        Ok(())
    }

    /// Roll back a writer. Readers abort trivially.
    pub fn abort(&self, tx: &Tx) -> Result<()> {
        if !tx.writable {
            return Ok(());
        }
        self.check_writer(tx)?;
        let (_, force_merge) = self.journal.write().abort_tx(tx.xid);
        self.release(tx.xid);
        debug!(xid = tx.xid, "abort");
        if tx.use_wal {
            self.wal.lock().append(&WalRecord::new(
                RecordType::Abort,
                self.config.entity,
                tx.xid,
                Vec::new(),
            ))?;
        }
        if force_merge {
            self.merge()?;
        }
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert rows, assigning fresh primary keys (the pk values in `rows`
    /// are ignored). Returns (first pk, count).
    pub fn insert(&self, tx: &Tx, rows: &[Row]) -> Result<(u64, usize)> {
        let buf = self.schema.encode_rows(rows)?;
        self.with_journal(tx, |journal, ctx| journal.insert_records(ctx, &buf))
    }

    /// Replace full rows identified by their primary key
    pub fn update(&self, tx: &Tx, rows: &[Row]) -> Result<usize> {
        let pks: Vec<u64> = rows
            .iter()
            .map(|r| r.first().and_then(Value::as_u64).unwrap_or(0))
            .collect();
        let rids = self.resolve(tx, &pks)?;
        let mut pack = DataPack::new(self.schema.clone(), rows.len());
        for (row, rid) in rows.iter().zip(rids) {
            pack.append_row(row.clone(), row_meta(rid))?;
        }
        pack.set_all_dirty();
        self.with_journal(tx, |journal, ctx| journal.update_pack(ctx, &pack))
    }

    /// Change selected fields of one row, logging only the changed columns
    pub fn update_fields(&self, tx: &Tx, pk: u64, changes: &[(usize, Value)]) -> Result<()> {
        let rid = self.resolve(tx, &[pk])?[0];
        let base = match self.journal.read().read_wire(rid) {
            Some(wire) => wire,
            None => self.table.read_wire(rid)?.ok_or(JournalError::NotFound(pk))?,
        };
        let mut pack = DataPack::new(self.schema.clone(), 1);
        pack.append_wire(&base, row_meta(rid))?;
        for (col, value) in changes {
            if *col == 0 || *col >= self.schema.num_fields() {
                return Err(JournalError::Schema(format!("cannot update field {}", col)));
            }
            pack.update_value(*col, 0, value.clone())?;
        }
        self.with_journal(tx, |journal, ctx| journal.update_pack(ctx, &pack))
            .map(|_| ())
    }

    /// Delete rows by primary key
    pub fn delete(&self, tx: &Tx, pks: &[u64]) -> Result<usize> {
        let rids = self.resolve(tx, pks)?;
        self.with_journal(tx, |journal, ctx| journal.delete_rids(ctx, &rids))
    }

    /// Map primary keys to the rids of their visible versions
    fn resolve(&self, tx: &Tx, pks: &[u64]) -> Result<Vec<Rid>> {
        let mut map: HashMap<u64, Rid> = pks
            .iter()
            .map(|&pk| (pk, self.table.rid_for_pk(pk, &tx.snap).unwrap_or(0)))
            .collect();
        self.journal.read().lookup(&mut map, &tx.snap);
        pks.iter()
            .map(|pk| match map.get(pk) {
                Some(&rid) if rid != 0 => Ok(rid),
                _ => Err(JournalError::NotFound(*pk)),
            })
            .collect()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Rows matching `node` visible to `tx`, ordered by primary key
    pub fn query(&self, tx: &Tx, node: &FilterNode) -> Result<Vec<Row>> {
        let journal = self.journal.read();
        let res = journal.query(node, &tx.snap, self.table.epoch());
        let mut rows = self.table.scan(node, &tx.snap, res.deleted())?;
        drop(journal);
        rows.extend(res.rows());
        rows.sort_by_key(|r| r.first().and_then(Value::as_u64).unwrap_or(0));
        Ok(rows)
    }

    /// Fetch one row by primary key
    pub fn get(&self, tx: &Tx, pk: u64) -> Result<Option<Row>> {
        Ok(self.query(tx, &FilterNode::pk_eq(pk))?.into_iter().next())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Merge every complete journal segment into the table store, oldest
    /// first. Returns the number of merged segments.
    pub fn merge(&self) -> Result<usize> {
        let mut journal = self.journal.write();
        let mut merged = 0;
        loop {
            let task = match journal.next_mergable() {
                Ok(Some(task)) => task,
                Ok(None) | Err(JournalError::Again) => break,
                Err(e) => return Err(e),
            };
            if let Err(e) = self.table.apply_merge(&task) {
                journal.abort_merged(task.id);
                return Err(e);
            }
            journal.confirm_merged(task.id);
            merged += 1;
        }
        Ok(merged)
    }

    /// Flush and sync the WAL
    pub fn sync(&self) -> Result<()> {
        self.wal.lock().sync()
    }

    pub fn stats(&self) -> EngineStats {
        let journal = self.journal.read();
        let state = journal.state();
        EngineStats {
            segments: journal.num_segments(),
            journal_records: journal.num_records(),
            live_rows: journal.len(),
            table_rows: self.table.len(),
            epoch: self.table.epoch(),
            next_xid: self.txs.lock().next_xid,
            next_pk: state.next_pk,
            last_lsn: self.wal.lock().current_lsn(),
        }
    }
}

fn row_meta(rid: Rid) -> RowMeta {
    RowMeta {
        rid,
        ref_id: rid,
        ..RowMeta::default()
    }
}
