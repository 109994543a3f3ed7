//! Journal Module
//!
//! Multi-version write buffer of one table. Absorbs inserts, updates and
//! deletes until they are merged into table storage and serves snapshot
//! isolated reads concurrently with the single active writer.
//!
//! ## Segment Chain
//! ```text
//!   tip (Active) ──parent──► tail[n-1] ──parent──► ... ──► tail[0] (oldest)
//!       │                        │                           │
//!   checkpoint LSN           checkpoint LSN              checkpoint LSN
//! ```
//!
//! - Only the tip takes new rows. Tail segments only resolve transactions
//!   and wait for a merge.
//! - Every segment boundary coincides with a WAL checkpoint record, so a
//!   segment can be replayed starting at a log position.
//!
//! ## Responsibilities
//! - Split write batches to fit the tip and log one WAL record per piece
//! - Rotate full segments and emit checkpoints
//! - Propagate commit/abort across segments, repairing table counters
//! - Select merge candidates and prune merged segments
//! - Merge per-segment matches into one query result

mod delete;
mod insert;
mod replay;
mod result;
mod segment;
mod tomb;
mod update;

pub use replay::{EmptyTable, TableReader};
pub use result::{QueryResult, ResultPart};
pub use segment::{Segment, SegmentState};
pub use tomb::{Tomb, Tombstone};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::bitset::Bitset;
use crate::config::Config;
use crate::error::{JournalError, Result};
use crate::filter::FilterNode;
use crate::pack::DataPack;
use crate::schema::Schema;
use crate::types::{Lsn, Rid, SegmentId, Snapshot, TableState, Xid};
use crate::wal::{RecordType, Wal, WalRecord};

// =============================================================================
// Write Context
// =============================================================================

/// Transaction context of a journal write
pub struct WriteCtx<'a> {
    pub xid: Xid,
    /// Log for this transaction, `None` when WAL is disabled
    pub wal: Option<&'a mut dyn Wal>,
}

impl<'a> WriteCtx<'a> {
    pub fn new(xid: Xid, wal: &'a mut dyn Wal) -> Self {
        Self {
            xid,
            wal: Some(wal),
        }
    }

    pub fn without_wal(xid: Xid) -> Self {
        Self { xid, wal: None }
    }

    pub fn use_wal(&self) -> bool {
        self.wal.is_some()
    }
}

// =============================================================================
// Merge Task
// =============================================================================

/// A complete segment claimed for merging into table storage
#[derive(Debug, Clone)]
pub struct MergeTask {
    pub id: SegmentId,
    pub data: Arc<DataPack>,
    pub stones: Vec<Tombstone>,
    /// WAL position up to which the log may be discarded once merged
    pub prune_lsn: Lsn,
    /// Table counters as of the end of this segment
    pub state: TableState,
}

// =============================================================================
// Journal
// =============================================================================

pub struct Journal {
    schema: Arc<Schema>,
    entity: u64,
    tip: Segment,
    /// Rotated segments, oldest first
    tail: Vec<Segment>,
    maxsz: usize,
    maxseg: usize,
}

impl Journal {
    pub fn new(schema: Arc<Schema>, entity: u64, maxsz: usize, maxseg: usize) -> Self {
        let tip = Segment::new(schema.clone(), 1, maxsz);
        Self {
            schema,
            entity,
            tip,
            tail: Vec::new(),
            maxsz,
            maxseg,
        }
    }

    pub fn from_config(schema: Arc<Schema>, config: &Config) -> Self {
        Self::new(
            schema,
            config.entity,
            config.journal_max_size,
            config.journal_max_segments,
        )
    }

    /// Seed table counters (next pk, next rid, row count) from table storage
    pub fn with_state(mut self, state: TableState) -> Self {
        self.tip.tstate = state;
        self
    }

    /// Drop all segments, keep table counters
    pub fn reset(&mut self) {
        self.tail.clear();
        self.tip.reset();
        self.tip.set_parent(None);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn entity(&self) -> u64 {
        self.entity
    }

    /// Live rows as tracked by the table counters
    pub fn len(&self) -> usize {
        self.tip.tstate.n_rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw data rows and tombstones across all segments
    pub fn num_records(&self) -> usize {
        self.segments().map(Segment::len).sum()
    }

    /// Records that still fit into the tip
    pub fn capacity(&self) -> usize {
        self.tip.capacity()
    }

    pub fn max_size(&self) -> usize {
        self.maxsz
    }

    pub fn max_segments(&self) -> usize {
        self.maxseg
    }

    pub fn num_segments(&self) -> usize {
        self.tail.len() + 1
    }

    pub fn state(&self) -> TableState {
        self.tip.tstate
    }

    pub fn tip(&self) -> &Segment {
        &self.tip
    }

    /// Segment by id, tip included
    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        if id == self.tip.id() {
            return Some(&self.tip);
        }
        self.tail
            .binary_search_by_key(&id, Segment::id)
            .ok()
            .map(|i| &self.tail[i])
    }

    /// Walk the chain from the tip along parent links
    pub fn segments(&self) -> Segments<'_> {
        Segments {
            journal: self,
            next: Some(&self.tip),
        }
    }

    pub fn heap_size(&self) -> usize {
        self.segments().map(Segment::heap_size).sum()
    }

    pub fn contains_rid(&self, rid: Rid) -> bool {
        self.segments().any(|s| s.contains_rid(rid))
    }

    /// True when a transaction visible to `snap` deleted or replaced `rid`
    pub fn is_deleted(&self, rid: Rid, snap: &Snapshot) -> bool {
        self.segments()
            .filter(|s| !s.is_prunable())
            .any(|s| s.tomb().find_visible(rid, snap).is_some())
    }

    /// Wire encoding of the live row version `rid`
    pub fn read_wire(&self, rid: Rid) -> Option<Vec<u8>> {
        self.segments()
            .filter(|s| s.state() != SegmentState::Empty)
            .find_map(|s| s.read_wire(rid))
    }

    // =========================================================================
    // Rotation and Checkpoints
    // =========================================================================

    /// Rotate when the tip is full, returns whether it did
    pub(crate) fn rotate_when_full(&mut self) -> bool {
        if !self.tip.is_full() {
            return false;
        }
        self.do_rotate();
        true
    }

    /// Rotate when the tip is full. With WAL enabled the new tip is tied
    /// to a checkpoint record.
    pub(crate) fn rotate_and_checkpoint(&mut self, ctx: &mut WriteCtx<'_>) -> Result<()> {
        if !self.rotate_when_full() {
            return Ok(());
        }
        if let Some(wal) = ctx.wal.as_deref_mut() {
            self.do_checkpoint(wal)?;
        }
        Ok(())
    }

    fn do_rotate(&mut self) {
        let mut next = Segment::new(self.schema.clone(), self.tip.id() + 1, self.maxsz);
        next.set_parent(Some(self.tip.id()));
        next.tstate = self.tip.tstate;

        let mut prev = std::mem::replace(&mut self.tip, next);
        let state = if !prev.is_done() {
            SegmentState::Waiting
        } else if prev.is_empty() {
            SegmentState::Empty
        } else {
            SegmentState::Complete
        };
        prev.set_state(state);
        debug!(
            segment = prev.id(),
            records = prev.len(),
            state = %state,
            "rotated journal segment"
        );
        self.tail.push(prev);
    }

    fn do_checkpoint(&mut self, wal: &mut dyn Wal) -> Result<Lsn> {
        let record = WalRecord::new(RecordType::Checkpoint, self.entity, 0, Vec::new());
        let lsn = wal.write(&record)?;
        self.tip.set_checkpoint(lsn);
        debug!(segment = self.tip.id(), lsn, "journal checkpoint");
        Ok(lsn)
    }

    // =========================================================================
    // Transaction Resolution
    // =========================================================================

    /// Commit `xid` in every segment it touched.
    ///
    /// Returns (can_merge, should_force_merge).
    pub fn commit_tx(&mut self, xid: Xid) -> (bool, bool) {
        let mut touched = false;
        for seg in self.tail.iter_mut() {
            if seg.commit_tx(xid) {
                touched = true;
                settle(seg);
            }
        }
        touched |= self.tip.commit_tx(xid);
        if touched {
            debug!(xid, "journal commit");
            self.prune();
        }
        self.merge_hints()
    }

    /// Roll back `xid` in every segment it touched and repair the table
    /// counters of the touched segment and every newer one.
    ///
    /// Segments are visited oldest to newest. A transaction only moves
    /// forward along the chain, so the running row diff of older segments
    /// also applies to every later segment.
    ///
    /// Returns (can_merge, should_force_merge).
    pub fn abort_tx(&mut self, xid: Xid) -> (bool, bool) {
        let mut rows_diff = 0i64;
        let mut first_rid = None;
        let mut first_pk = None;
        let mut touched = false;

        for seg in self.tail.iter_mut().chain(std::iter::once(&mut self.tip)) {
            if seg.contains_tx(xid) {
                let stats = seg.abort_tx(xid);
                rows_diff += stats.rows_diff;
                first_rid = first_rid.or(stats.first_rid);
                first_pk = first_pk.or(stats.first_pk);
                touched = true;
            }
            if !touched {
                continue;
            }
            seg.tstate.apply_rows_diff(rows_diff);
            if let Some(rid) = first_rid {
                seg.tstate.next_rid = seg.tstate.next_rid.min(rid);
            }
            if let Some(pk) = first_pk {
                seg.tstate.next_pk = seg.tstate.next_pk.min(pk);
            }
            settle(seg);
        }

        if touched {
            debug!(xid, rows_diff, "journal abort");
            self.prune();
        }
        self.merge_hints()
    }

    /// Abort every transaction still open after WAL replay. Returns the
    /// aborted xids.
    pub fn abort_active_tx(&mut self) -> Vec<Xid> {
        let mut xids: Vec<Xid> = self
            .segments()
            .map(Segment::active_tx)
            .filter(|x| *x != 0)
            .collect();
        xids.sort_unstable();
        xids.dedup();
        for &xid in &xids {
            self.abort_tx(xid);
        }
        xids
    }

    fn merge_hints(&self) -> (bool, bool) {
        let can_merge = self
            .tail
            .iter()
            .any(|s| s.state() == SegmentState::Complete);
        (can_merge, self.tail.len() >= self.maxseg)
    }

    // =========================================================================
    // Merge Scheduling
    // =========================================================================

    /// Claim the oldest tail segment for merging.
    ///
    /// Fails with `Again` while another merge is in flight and more
    /// segments are queued. Returns `None` when nothing is ready.
    pub fn next_mergable(&mut self) -> Result<Option<MergeTask>> {
        let Some(pos) = self.tail.iter().position(|s| !s.is_prunable()) else {
            return Ok(None);
        };
        match self.tail[pos].state() {
            SegmentState::Merging if self.tail.len() > 1 => Err(JournalError::Again),
            SegmentState::Complete => {
                let prune_lsn = self
                    .tail
                    .get(pos + 1)
                    .map_or(self.tip.checkpoint(), Segment::checkpoint);
                let seg = &mut self.tail[pos];
                seg.set_state(SegmentState::Merging);
                debug!(segment = seg.id(), prune_lsn, "claimed segment for merge");
                Ok(Some(MergeTask {
                    id: seg.id(),
                    data: seg.data().clone(),
                    stones: seg.tomb().stones().to_vec(),
                    prune_lsn,
                    state: seg.table_state(),
                }))
            }
            _ => Ok(None),
        }
    }

    /// Finish a merge: the segment's content is durable in table storage
    pub fn confirm_merged(&mut self, id: SegmentId) {
        if let Some(seg) = self.tail_mut(id, SegmentState::Merging) {
            seg.set_state(SegmentState::Merged);
            self.prune();
        }
    }

    /// Give a claimed segment back after a failed merge
    pub fn abort_merged(&mut self, id: SegmentId) {
        if let Some(seg) = self.tail_mut(id, SegmentState::Merging) {
            seg.set_state(SegmentState::Complete);
        }
    }

    fn tail_mut(&mut self, id: SegmentId, state: SegmentState) -> Option<&mut Segment> {
        self.tail
            .iter_mut()
            .find(|s| s.id() == id && s.state() == state)
    }

    /// Remove empty and merged segments and relink parents
    fn prune(&mut self) {
        let before = self.tail.len();
        self.tail.retain(|s| !s.is_prunable());
        if self.tail.len() == before {
            return;
        }
        let mut parent = None;
        for seg in self.tail.iter_mut() {
            seg.set_parent(parent);
            parent = Some(seg.id());
        }
        self.tip.set_parent(parent);
        debug!(pruned = before - self.tail.len(), "pruned journal segments");
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Match `node` against every segment newer than `epoch` under `snap`.
    ///
    /// Newer segments go first so their tombstones are in the result's
    /// deleted set before older segments are matched.
    pub fn query(&self, node: &FilterNode, snap: &Snapshot, epoch: SegmentId) -> QueryResult {
        let mut res = QueryResult::new();
        let mut bits = Bitset::new(self.maxsz);
        for seg in self.segments() {
            if seg.id() <= epoch {
                break;
            }
            if seg.is_prunable() {
                continue;
            }
            seg.merge_deleted(res.deleted_mut(), snap);
            seg.match_rows(node, snap, res.deleted(), &mut bits);
            if bits.any() {
                let mut sel = Vec::with_capacity(bits.count());
                bits.indexes(&mut sel);
                res.append(seg.id(), seg.data().clone(), sel);
            }
        }
        res
    }

    /// Resolve primary keys to the rid of their newest version visible to
    /// `snap`.
    ///
    /// Nonzero input values are rids found in table storage and are
    /// replaced by newer journal versions. Keys whose resolved version was
    /// deleted by a visible transaction map to 0. Returns true when every
    /// key resolved.
    pub fn lookup(&self, pks: &mut HashMap<u64, Rid>, snap: &Snapshot) -> bool {
        if pks.is_empty() {
            return true;
        }
        let from_table = pks.values().any(|rid| *rid != 0);

        // stage 1: newest visible version per pk
        let mut pending: usize = pks.len();
        let mut found: HashSet<u64> = HashSet::with_capacity(pks.len());
        let mut oldest = None;
        for seg in self.segments() {
            if pending == 0 {
                break;
            }
            if seg.is_prunable() {
                continue;
            }
            let data = seg.data();
            let (keys, xmins) = (data.pks(), data.xmins());
            for i in (0..data.len()).rev() {
                let pk = keys[i];
                if found.contains(&pk) || !snap.is_visible(xmins[i]) {
                    continue;
                }
                if let Some(rid) = pks.get_mut(&pk) {
                    *rid = data.rid(i);
                    found.insert(pk);
                    pending -= 1;
                    oldest = Some(seg.id());
                }
            }
        }

        // stage 2: drop versions deleted by a visible transaction
        let mut resolved: HashMap<Rid, u64> = pks
            .iter()
            .filter(|(_, rid)| **rid != 0)
            .map(|(pk, rid)| (*rid, *pk))
            .collect();
        for seg in self.segments() {
            if resolved.is_empty() {
                break;
            }
            if !seg.is_prunable() {
                for stone in seg.tomb().stones().iter().rev() {
                    if !resolved.contains_key(&stone.rid) || !snap.is_visible(stone.xid) {
                        continue;
                    }
                    if let Some(pk) = resolved.remove(&stone.rid) {
                        pks.insert(pk, 0);
                    }
                }
            }
            // deletes never precede the version they delete
            if !from_table && oldest == Some(seg.id()) {
                break;
            }
        }

        pks.values().all(|rid| *rid != 0)
    }
}

/// Move a rotated segment forward once its last writer resolved
fn settle(seg: &mut Segment) {
    if seg.state() == SegmentState::Waiting && seg.is_done() {
        let state = if seg.is_empty() {
            SegmentState::Empty
        } else {
            SegmentState::Complete
        };
        seg.set_state(state);
        debug!(segment = seg.id(), state = %state, "journal segment settled");
    }
}

// =============================================================================
// Segment Chain Iterator
// =============================================================================

/// Iterator over segments from the tip along parent links
pub struct Segments<'a> {
    journal: &'a Journal,
    next: Option<&'a Segment>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<Self::Item> {
        let seg = self.next?;
        self.next = seg.parent().and_then(|id| {
            self.journal
                .tail
                .binary_search_by_key(&id, Segment::id)
                .ok()
                .map(|i| &self.journal.tail[i])
        });
        Some(seg)
    }
}
