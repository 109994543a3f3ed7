//! Core identifiers, snapshots and table state
//!
//! ## Visibility Rules
//! ```text
//!   xid == 0                 → aborted, never visible
//!   xid == xown              → own writes, always visible
//!   xid >= xmax              → started after the snapshot, invisible
//!   xid in active set        → concurrent and uncommitted, invisible
//!   otherwise                → committed before the snapshot, visible
//! ```

use std::collections::HashSet;
use std::ops::RangeInclusive;

use roaring::RoaringTreemap;

/// Transaction id, 0 is reserved for "aborted / never existed"
pub type Xid = u64;

/// Row version id, assigned sequentially
pub type Rid = u64;

/// Log sequence number returned by the WAL
pub type Lsn = u64;

/// Journal segment id, monotonic per journal
pub type SegmentId = u32;

// =============================================================================
// Snapshot
// =============================================================================

/// Read snapshot for MVCC visibility decisions. Never mutated after creation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Low-water mark: every xid below is committed or aborted
    pub xmin: Xid,
    /// First xid not yet issued when the snapshot was taken
    pub xmax: Xid,
    /// Own transaction id (0 for pure readers)
    pub xown: Xid,
    /// Transactions active when the snapshot was taken
    pub xact: HashSet<Xid>,
    /// No concurrent writers existed when the snapshot was taken
    pub safe: bool,
}

impl Snapshot {
    /// Create a snapshot from the issuer's view of active transactions
    pub fn new(xown: Xid, xmax: Xid, active: impl IntoIterator<Item = Xid>) -> Self {
        let xact: HashSet<Xid> = active.into_iter().filter(|x| *x != xown).collect();
        let xmin = xact.iter().copied().min().unwrap_or(xmax).min(xmax);
        Self {
            xmin,
            xmax,
            xown,
            safe: xact.is_empty(),
            xact,
        }
    }

    /// Snapshot that sees every committed transaction below `xmax`
    pub fn committed(xmax: Xid) -> Self {
        Self::new(0, xmax, std::iter::empty())
    }

    #[inline]
    pub fn is_visible(&self, xid: Xid) -> bool {
        if xid == 0 {
            return false;
        }
        if xid == self.xown {
            return true;
        }
        if xid < self.xmin {
            return true;
        }
        xid < self.xmax && !self.xact.contains(&xid)
    }
}

// =============================================================================
// Table State
// =============================================================================

/// Table-level counters carried forward from segment to segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableState {
    pub next_pk: u64,
    pub next_rid: Rid,
    pub n_rows: u64,
}

impl TableState {
    /// Fresh state for an empty table (pk and rid numbering start at 1)
    pub fn new() -> Self {
        Self {
            next_pk: 1,
            next_rid: 1,
            n_rows: 0,
        }
    }

    pub(crate) fn apply_rows_diff(&mut self, diff: i64) {
        self.n_rows = (self.n_rows as i64 + diff).max(0) as u64;
    }
}

// =============================================================================
// Rid Set
// =============================================================================

/// Compressed rid bitmap (cross-segment tomb mask and tomb membership)
#[derive(Debug, Clone, PartialEq)]
pub struct RidSet {
    rids: RoaringTreemap,
}

impl Default for RidSet {
    fn default() -> Self {
        Self {
            rids: RoaringTreemap::new(),
        }
    }
}

impl RidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rid: Rid) -> bool {
        self.rids.insert(rid)
    }

    pub fn remove(&mut self, rid: Rid) -> bool {
        self.rids.remove(rid)
    }

    #[inline]
    pub fn contains(&self, rid: Rid) -> bool {
        self.rids.contains(rid)
    }

    /// True when any rid within `range` is present
    pub fn contains_range(&self, range: RangeInclusive<Rid>) -> bool {
        let (lo, hi) = range.into_inner();
        if lo > hi {
            return false;
        }
        // rank(x) counts members <= x
        let below = if lo == 0 { 0 } else { self.rids.rank(lo - 1) };
        self.rids.rank(hi) > below
    }

    pub fn or(&mut self, other: &RidSet) {
        self.rids |= &other.rids;
    }

    pub fn min(&self) -> Option<Rid> {
        self.rids.min()
    }

    pub fn max(&self) -> Option<Rid> {
        self.rids.max()
    }

    pub fn len(&self) -> usize {
        self.rids.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.rids.is_empty()
    }

    pub fn clear(&mut self) {
        self.rids.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = Rid> + '_ {
        self.rids.iter()
    }

    /// Serialized bitmap size, a proxy for memory use
    pub fn heap_size(&self) -> usize {
        self.rids.serialized_size()
    }
}

impl FromIterator<Rid> for RidSet {
    fn from_iter<I: IntoIterator<Item = Rid>>(iter: I) -> Self {
        Self {
            rids: iter.into_iter().collect(),
        }
    }
}
