//! Journal Segment
//!
//! A bounded unit of journal storage: a columnar data pack with per-row
//! transaction metadata plus a tombstone log.
//!
//! ## Lifecycle
//! ```text
//!   Active ──(full)──► Waiting ──(tx resolved)──► Complete
//!                                                    │
//!                                          (claimed) ▼
//!              Merged ◄──(merge durable)──────── Merging
//!
//!   Empty: rotated or resolved with only aborted content
//!   Empty and Merged are prunable
//! ```
//!
//! ## Single Writer
//! Only the tip segment receives new rows and only one transaction writes
//! at a time, so the rows of the current writer are always contiguous at
//! the end of the data pack. Rows that survive (xmin != 0) carry strictly
//! increasing rids, even after an abort hands its rid range out again.

use std::fmt;
use std::sync::Arc;

use crate::bitset::Bitset;
use crate::error::Result;
use crate::filter::{match_tree, FilterNode};
use crate::pack::{DataPack, RowMeta};
use crate::schema::Schema;
use crate::types::{Lsn, Rid, RidSet, SegmentId, Snapshot, TableState, Xid};

use super::tomb::Tomb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Empty,
    Active,
    Waiting,
    Complete,
    Merging,
    Merged,
}

impl SegmentState {
    pub fn is_prunable(self) -> bool {
        matches!(self, SegmentState::Empty | SegmentState::Merged)
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SegmentState::Empty => "empty",
            SegmentState::Active => "active",
            SegmentState::Waiting => "waiting",
            SegmentState::Complete => "complete",
            SegmentState::Merging => "merging",
            SegmentState::Merged => "merged",
        };
        f.write_str(s)
    }
}

/// Effect of rolling back one transaction inside a segment
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AbortStats {
    /// Change to the live row count (+reverted deletes, -reverted inserts)
    pub rows_diff: i64,
    /// Smallest rid claimed by the aborted transaction here
    pub first_rid: Option<Rid>,
    /// Smallest pk assigned by an aborted insert here
    pub first_pk: Option<u64>,
}

#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    parent: Option<SegmentId>,
    state: SegmentState,
    data: Arc<DataPack>,
    tomb: Tomb,
    aborted: Option<Bitset>,

    // xid and rid ranges, 0 = unset
    xmin: Xid,
    xmax: Xid,
    rmin: Rid,
    rmax: Rid,

    /// Open writer, 0 if none
    xact: Xid,

    n_insert: usize,
    n_update: usize,
    n_delete: usize,
    n_abort: usize,

    checkpoint: Lsn,
    pub(crate) tstate: TableState,
    maxsz: usize,
}

impl Segment {
    pub fn new(schema: Arc<Schema>, id: SegmentId, maxsz: usize) -> Self {
        Self {
            id,
            parent: None,
            state: SegmentState::Active,
            data: Arc::new(DataPack::new(schema, maxsz)),
            tomb: Tomb::new(),
            aborted: None,
            xmin: 0,
            xmax: 0,
            rmin: 0,
            rmax: 0,
            xact: 0,
            n_insert: 0,
            n_update: 0,
            n_delete: 0,
            n_abort: 0,
            checkpoint: 0,
            tstate: TableState::new(),
            maxsz,
        }
    }

    /// Drop all content, keep id, parent and table state
    pub fn reset(&mut self) {
        Arc::make_mut(&mut self.data).clear();
        self.tomb.clear();
        self.aborted = None;
        self.xmin = 0;
        self.xmax = 0;
        self.rmin = 0;
        self.rmax = 0;
        self.xact = 0;
        self.n_insert = 0;
        self.n_update = 0;
        self.n_delete = 0;
        self.n_abort = 0;
        self.state = SegmentState::Active;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn parent(&self) -> Option<SegmentId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<SegmentId>) {
        self.parent = parent;
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SegmentState) {
        self.state = state;
    }

    pub fn data(&self) -> &Arc<DataPack> {
        &self.data
    }

    pub fn tomb(&self) -> &Tomb {
        &self.tomb
    }

    pub fn aborted(&self) -> Option<&Bitset> {
        self.aborted.as_ref()
    }

    pub fn checkpoint(&self) -> Lsn {
        self.checkpoint
    }

    pub(crate) fn set_checkpoint(&mut self, lsn: Lsn) {
        self.checkpoint = lsn;
    }

    pub fn table_state(&self) -> TableState {
        self.tstate
    }

    /// Data rows plus tombstones
    pub fn len(&self) -> usize {
        self.data.len() + self.tomb.len()
    }

    pub fn max_size(&self) -> usize {
        self.maxsz
    }

    /// Records that still fit before the segment is full
    pub fn capacity(&self) -> usize {
        self.maxsz
            .saturating_sub(self.data.len().max(self.tomb.len()))
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.maxsz || self.tomb.len() >= self.maxsz
    }

    /// No rows other than aborted ones and no tombstones
    pub fn is_empty(&self) -> bool {
        self.data.len() == self.n_abort && self.tomb.is_empty()
    }

    /// No transaction that wrote here is still open
    pub fn is_done(&self) -> bool {
        self.xact == 0
    }

    pub fn is_prunable(&self) -> bool {
        self.state.is_prunable()
    }

    pub fn contains_tx(&self, xid: Xid) -> bool {
        xid != 0 && self.xact == xid
    }

    /// Open writer transaction, 0 if none
    pub fn active_tx(&self) -> Xid {
        self.xact
    }

    /// Range check only. Live versions never share a rid across segments,
    /// but rids of an aborted tail are handed out again, so an aborted
    /// range may overlap a newer segment.
    pub fn contains_rid(&self, rid: Rid) -> bool {
        self.rmin != 0 && rid >= self.rmin && rid <= self.rmax
    }

    pub fn xid_range(&self) -> (Xid, Xid) {
        (self.xmin, self.xmax)
    }

    pub fn rid_range(&self) -> (Rid, Rid) {
        (self.rmin, self.rmax)
    }

    pub fn n_insert(&self) -> usize {
        self.n_insert
    }

    pub fn n_update(&self) -> usize {
        self.n_update
    }

    pub fn n_delete(&self) -> usize {
        self.n_delete
    }

    pub fn n_abort(&self) -> usize {
        self.n_abort
    }

    pub fn heap_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.data.heap_size()
            + self.tomb.heap_size()
            + self.aborted.as_ref().map_or(0, Bitset::heap_size)
    }

    /// Row position of the live version `rid`
    pub fn find_row(&self, rid: Rid) -> Option<usize> {
        if !self.contains_rid(rid) {
            return None;
        }
        if self.n_abort == 0 {
            return self.data.rids().binary_search(&rid).ok();
        }
        (0..self.data.len())
            .rev()
            .find(|&i| self.data.rid(i) == rid && self.data.xmin(i) != 0)
    }

    /// Wire encoding of the live version `rid`
    pub fn read_wire(&self, rid: Rid) -> Option<Vec<u8>> {
        let i = self.find_row(rid)?;
        let mut buf = Vec::new();
        self.data.read_wire(i, &mut buf);
        Some(buf)
    }

    fn aborted_mut(&mut self) -> &mut Bitset {
        let len = self.data.len();
        self.aborted.get_or_insert_with(|| Bitset::new(len))
    }

    fn track_xid(&mut self, xid: Xid) {
        if self.xmin == 0 || xid < self.xmin {
            self.xmin = xid;
        }
        self.xmax = self.xmax.max(xid);
        self.xact = xid;
    }

    fn track_rid(&mut self, rid: Rid) {
        if self.rmin == 0 || rid < self.rmin {
            self.rmin = rid;
        }
        self.rmax = self.rmax.max(rid);
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    fn append(&mut self, xid: Xid, rid: Rid, ref_id: Rid, wire: &[u8]) -> Result<()> {
        let meta = RowMeta {
            rid,
            ref_id,
            xmin: xid,
            xmax: 0,
            deleted: false,
        };
        Arc::make_mut(&mut self.data).append_wire(wire, meta)?;
        if let Some(aborted) = self.aborted.as_mut() {
            aborted.push(false);
        }
        self.track_xid(xid);
        self.track_rid(rid);
        Ok(())
    }

    pub fn insert_record(&mut self, xid: Xid, rid: Rid, wire: &[u8]) -> Result<()> {
        self.append(xid, rid, rid, wire)?;
        self.n_insert += 1;
        Ok(())
    }

    /// Append the post-image `rid` replacing `ref_id`
    pub fn update_record(&mut self, xid: Xid, rid: Rid, ref_id: Rid, wire: &[u8]) -> Result<()> {
        let prior = self.find_row(ref_id);
        self.append(xid, rid, ref_id, wire)?;
        self.tomb.append(xid, ref_id, false);
        if let Some(i) = prior {
            Arc::make_mut(&mut self.data).set_xmax(i, xid);
        }
        self.n_update += 1;
        Ok(())
    }

    pub fn notify_delete(&mut self, xid: Xid, rid: Rid) {
        self.tomb.append(xid, rid, true);
        if let Some(i) = self.find_row(rid) {
            let data = Arc::make_mut(&mut self.data);
            data.set_xmax(i, xid);
            data.set_deleted(i, true);
        }
        self.track_xid(xid);
        self.n_delete += 1;
    }

    pub fn commit_tx(&mut self, xid: Xid) -> bool {
        if !self.contains_tx(xid) {
            return false;
        }
        self.xact = 0;
        true
    }

    /// Roll back everything `xid` wrote into this segment. A no-op unless
    /// `xid` is the segment's open writer.
    pub(crate) fn abort_tx(&mut self, xid: Xid) -> AbortStats {
        let mut stats = AbortStats::default();
        if !self.contains_tx(xid) {
            return stats;
        }

        // rows of the open writer are contiguous at the end
        let end = self.data.len();
        let mut start = end;
        while start > 0 && self.data.xmin(start - 1) == xid {
            start -= 1;
        }
        let replaced: Vec<usize> = self
            .data
            .xmaxs()
            .iter()
            .enumerate()
            .filter_map(|(i, x)| (*x == xid).then_some(i))
            .collect();

        if start < end || !replaced.is_empty() {
            let data = Arc::make_mut(&mut self.data);
            for i in (start..end).rev() {
                let rid = data.rid(i);
                if data.ref_id(i) == rid {
                    self.n_insert -= 1;
                    stats.rows_diff -= 1;
                    stats.first_pk = Some(data.pk(i));
                } else {
                    self.n_update -= 1;
                }
                stats.first_rid = Some(rid);
                data.set_xmin(i, 0);
            }
            for &i in &replaced {
                data.set_xmax(i, 0);
                data.set_deleted(i, false);
            }
            self.n_abort += end - start;
            let aborted = self.aborted_mut();
            for i in start..end {
                aborted.set(i);
            }
        }

        let (_, n_del) = self.tomb.abort_tx(xid);
        self.n_delete -= n_del;
        stats.rows_diff += n_del as i64;
        self.xact = 0;
        stats
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Match rows against `node` and drop rows invisible to `snap` or
    /// deleted according to `mask`. Writes one bit per data row into `bits`.
    pub fn match_rows(&self, node: &FilterNode, snap: &Snapshot, mask: &RidSet, bits: &mut Bitset) {
        bits.reset(self.data.len());
        if self.state == SegmentState::Empty || self.data.is_empty() {
            return;
        }
        // only future data
        if self.xmin >= snap.xmax {
            return;
        }

        match_tree(node, &self.data, bits);
        if bits.none() {
            return;
        }
        if let Some(aborted) = &self.aborted {
            bits.and_not(aborted);
        }

        let has_tomb = mask.contains_range(self.rmin..=self.rmax);
        let rids = self.data.rids();

        if self.is_done() && self.xmax < snap.xmin {
            // settled: every xid here is visible, drop deletes only
            bits.and_not(self.data.dels());
            if !has_tomb {
                return;
            }
            let max = mask.max().unwrap_or(0);
            let hits: Vec<usize> = bits.iter_ones().collect();
            for i in hits {
                if rids[i] > max {
                    break;
                }
                if mask.contains(rids[i]) {
                    bits.unset(i);
                }
            }
        } else {
            let xmins = self.data.xmins();
            let hits: Vec<usize> = bits.iter_ones().collect();
            for i in hits {
                if !snap.is_visible(xmins[i]) || (has_tomb && mask.contains(rids[i])) {
                    bits.unset(i);
                }
            }
        }
    }

    /// Add rids deleted or replaced by transactions visible to `snap`
    pub fn merge_deleted(&self, set: &mut RidSet, snap: &Snapshot) {
        if self.state == SegmentState::Empty || self.tomb.is_empty() {
            return;
        }
        // no stone is visible to this snapshot
        if self.tomb.min_xid() >= snap.xmax {
            return;
        }
        self.tomb.merge_visible(set, snap);
    }
}
