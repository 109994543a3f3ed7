//! Table Store
//!
//! In-memory stand-in for on-disk table storage. Receives merged journal
//! segments and serves the rows that no longer live in the journal.
//!
//! ## Structure
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ RwLock<TableInner>                          │
//! │  rows:  BTreeMap<rid, (xmin, wire)>         │
//! │  pks:   HashMap<pk, rid>  (newest version)  │
//! │  epoch: last merged segment id              │
//! └─────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::bitset::Bitset;
use crate::error::Result;
use crate::filter::{match_tree, FilterNode};
use crate::journal::{MergeTask, TableReader};
use crate::pack::{DataPack, RowMeta};
use crate::schema::{Row, Schema};
use crate::types::{Lsn, Rid, RidSet, SegmentId, Snapshot, TableState, Xid};

#[derive(Debug, Clone)]
struct StoredRow {
    pk: u64,
    xmin: Xid,
    wire: Vec<u8>,
}

#[derive(Debug, Default)]
struct TableInner {
    rows: BTreeMap<Rid, StoredRow>,
    pks: HashMap<u64, Rid>,
    state: TableState,
    epoch: SegmentId,
    merged_lsn: Lsn,
}

pub struct TableStore {
    schema: Arc<Schema>,
    inner: RwLock<TableInner>,
}

impl TableStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            inner: RwLock::new(TableInner {
                state: TableState::new(),
                ..TableInner::default()
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the newest merged journal segment, 0 if none
    pub fn epoch(&self) -> SegmentId {
        self.inner.read().epoch
    }

    /// WAL position covered by merged segments
    pub fn merged_lsn(&self) -> Lsn {
        self.inner.read().merged_lsn
    }

    /// Table counters as of the last merge
    pub fn state(&self) -> TableState {
        self.inner.read().state
    }

    /// Apply a claimed journal segment: add its surviving rows, then drop
    /// every version its tombstones name.
    pub fn apply_merge(&self, task: &MergeTask) -> Result<usize> {
        let data = &task.data;
        let mut inner = self.inner.write();
        let mut added = 0;
        for i in 0..data.len() {
            // aborted
            if data.xmin(i) == 0 {
                continue;
            }
            let mut wire = Vec::new();
            data.read_wire(i, &mut wire);
            let (rid, pk) = (data.rid(i), data.pk(i));
            inner.rows.insert(
                rid,
                StoredRow {
                    pk,
                    xmin: data.xmin(i),
                    wire,
                },
            );
            inner.pks.insert(pk, rid);
            added += 1;
        }
        for stone in &task.stones {
            if let Some(row) = inner.rows.remove(&stone.rid) {
                if inner.pks.get(&row.pk) == Some(&stone.rid) {
                    inner.pks.remove(&row.pk);
                }
            }
        }
        inner.state = task.state;
        inner.epoch = task.id;
        inner.merged_lsn = task.prune_lsn;
        debug!(
            segment = task.id,
            added,
            removed = task.stones.len(),
            rows = inner.rows.len(),
            "merged journal segment into table"
        );
        Ok(added)
    }

    /// Rid of the stored version of `pk` if visible to `snap`
    pub fn rid_for_pk(&self, pk: u64, snap: &Snapshot) -> Option<Rid> {
        let inner = self.inner.read();
        let rid = *inner.pks.get(&pk)?;
        let row = inner.rows.get(&rid)?;
        snap.is_visible(row.xmin).then_some(rid)
    }

    /// Rows matching `node`, visible to `snap` and not in `deleted`
    pub fn scan(&self, node: &FilterNode, snap: &Snapshot, deleted: &RidSet) -> Result<Vec<Row>> {
        let inner = self.inner.read();
        let mut pack = DataPack::new(self.schema.clone(), inner.rows.len());
        for (&rid, row) in inner.rows.iter() {
            if !snap.is_visible(row.xmin) || deleted.contains(rid) {
                continue;
            }
            let meta = RowMeta {
                rid,
                ref_id: rid,
                xmin: row.xmin,
                ..RowMeta::default()
            };
            pack.append_wire(&row.wire, meta)?;
        }
        drop(inner);

        let mut bits = Bitset::new(pack.len());
        match_tree(node, &pack, &mut bits);
        Ok(bits.iter_ones().map(|i| pack.row(i)).collect())
    }
}

impl TableReader for TableStore {
    fn read_wire(&self, rid: Rid) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().rows.get(&rid).map(|r| r.wire.clone()))
    }
}
