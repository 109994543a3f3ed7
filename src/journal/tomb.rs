//! Tombstone Log
//!
//! Per-segment record of row versions deleted or replaced by a transaction.
//!
//! ## Invariants
//! - `stones` is sorted by xid. New stones almost always carry the largest
//!   xid (single writer), so insertion scans backward from the end.
//! - `rids` mirrors exactly the rids present in `stones`.
//!
//! ## Binary Format
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────────────┬────────┬──────────┐
//! │ count   │ min_rid │ min_xid │ (rid-min_rid, xid-min_xid)*  │ nbytes │ del bits │
//! └─────────┴─────────┴─────────┴──────────────────────────────┴────────┴──────────┘
//!   all fields unsigned varints except the trailing delete-flag bitmap
//! ```

use bytes::Buf;

use crate::bitset::Bitset;
use crate::codec::{ensure_remaining, get_uvarint, put_uvarint};
use crate::error::{JournalError, Result};
use crate::types::{Rid, RidSet, Snapshot, Xid};

/// One deleted or replaced row version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    pub xid: Xid,
    pub rid: Rid,
    /// True delete (as opposed to replacement by an update)
    pub is_delete: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Tomb {
    rids: RidSet,
    stones: Vec<Tombstone>,
    max_xid: Xid,
    dirty: bool,
}

impl Tomb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stones.is_empty()
    }

    pub fn stones(&self) -> &[Tombstone] {
        &self.stones
    }

    pub fn rids(&self) -> &RidSet {
        &self.rids
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.rids.contains(rid)
    }

    /// Largest xid of any stone, 0 when empty
    pub fn max_xid(&self) -> Xid {
        self.max_xid
    }

    /// Smallest xid of any stone, 0 when empty
    pub fn min_xid(&self) -> Xid {
        self.stones.first().map_or(0, |s| s.xid)
    }

    /// Number of true deletes
    pub fn num_deletes(&self) -> usize {
        self.stones.iter().filter(|s| s.is_delete).count()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn clear(&mut self) {
        self.rids.clear();
        self.stones.clear();
        self.max_xid = 0;
        self.dirty = false;
    }

    pub fn heap_size(&self) -> usize {
        self.stones.capacity() * std::mem::size_of::<Tombstone>() + self.rids.heap_size()
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    pub fn append(&mut self, xid: Xid, rid: Rid, is_delete: bool) {
        let pos = self
            .stones
            .iter()
            .rposition(|s| s.xid <= xid)
            .map_or(0, |p| p + 1);
        self.stones.insert(pos, Tombstone { xid, rid, is_delete });
        self.rids.insert(rid);
        self.max_xid = self.max_xid.max(xid);
        self.dirty = true;
    }

    /// Drop all stones written by `xid`, returns (removed, true deletes)
    pub fn abort_tx(&mut self, xid: Xid) -> (usize, usize) {
        let start = self.stones.partition_point(|s| s.xid < xid);
        let run = self.stones[start..]
            .iter()
            .take_while(|s| s.xid == xid)
            .count();
        if run == 0 {
            return (0, 0);
        }
        let removed: Vec<Tombstone> = self.stones.drain(start..start + run).collect();
        let mut n_del = 0;
        for stone in &removed {
            if !self.stones.iter().any(|s| s.rid == stone.rid) {
                self.rids.remove(stone.rid);
            }
            if stone.is_delete {
                n_del += 1;
            }
        }
        self.max_xid = self.stones.last().map_or(0, |s| s.xid);
        self.dirty = true;
        (run, n_del)
    }

    // -------------------------------------------------------------------------
    // Visibility
    // -------------------------------------------------------------------------

    /// Add rids of stones whose transaction is visible to `snap` into `set`
    pub fn merge_visible(&self, set: &mut RidSet, snap: &Snapshot) {
        if self.stones.is_empty() {
            return;
        }
        if self.max_xid < snap.xmin || (snap.safe && self.max_xid < snap.xmax) {
            set.or(&self.rids);
            return;
        }

        let mut last_xid = 0;
        let mut visible = false;
        for (i, stone) in self.stones.iter().enumerate().rev() {
            if stone.xid < snap.xmin {
                // everything from here down is settled
                for s in &self.stones[..=i] {
                    set.insert(s.rid);
                }
                return;
            }
            if stone.xid != last_xid {
                last_xid = stone.xid;
                visible = snap.is_visible(stone.xid);
            }
            if visible {
                set.insert(stone.rid);
            }
        }
    }

    /// Find a stone for `rid` visible to `snap`
    pub fn find_visible(&self, rid: Rid, snap: &Snapshot) -> Option<Tombstone> {
        if !self.rids.contains(rid) {
            return None;
        }
        self.stones
            .iter()
            .rev()
            .find(|s| s.rid == rid && snap.is_visible(s.xid))
            .copied()
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Encode as `[count][min rid][min xid]` followed by one
    /// `[rid delta][xid delta]` varint pair per stone, then
    /// `[nbytes][delete bitmap]`.
    pub fn marshal_binary(&self) -> Vec<u8> {
        let min_rid = self.stones.iter().map(|s| s.rid).min().unwrap_or(0);
        let min_xid = self.min_xid();
        let mut buf = Vec::with_capacity(3 + self.stones.len() * 4);
        put_uvarint(&mut buf, self.stones.len() as u64);
        put_uvarint(&mut buf, min_rid);
        put_uvarint(&mut buf, min_xid);
        let mut flags = Bitset::new(self.stones.len());
        for (i, s) in self.stones.iter().enumerate() {
            put_uvarint(&mut buf, s.rid - min_rid);
            put_uvarint(&mut buf, s.xid - min_xid);
            if s.is_delete {
                flags.set(i);
            }
        }
        let flags = flags.to_bytes();
        put_uvarint(&mut buf, flags.len() as u64);
        buf.extend_from_slice(&flags);
        buf
    }

    /// Decode the layout written by [`Tomb::marshal_binary`]. It is a
    /// superset of the plain delta list: the trailing `[nbytes][delete
    /// bitmap]` is required, so a buffer without it fails as short.
    pub fn unmarshal_binary(mut buf: &[u8]) -> Result<Self> {
        let count = get_uvarint(&mut buf)? as usize;
        let min_rid = get_uvarint(&mut buf)?;
        let min_xid = get_uvarint(&mut buf)?;

        // every stone takes at least two bytes
        ensure_remaining(&buf, count.saturating_mul(2))?;

        let mut tomb = Tomb::new();
        tomb.stones.reserve(count);
        let mut prev_xid = 0;
        for _ in 0..count {
            let rid = offset(min_rid, get_uvarint(&mut buf)?)?;
            let xid = offset(min_xid, get_uvarint(&mut buf)?)?;
            if xid < prev_xid {
                return Err(JournalError::Decode(format!(
                    "tombstones out of xid order: {} after {}",
                    xid, prev_xid
                )));
            }
            prev_xid = xid;
            tomb.stones.push(Tombstone {
                xid,
                rid,
                is_delete: false,
            });
            tomb.rids.insert(rid);
        }

        let nbytes = get_uvarint(&mut buf)? as usize;
        if nbytes != (count + 7) / 8 {
            return Err(JournalError::Decode(format!(
                "delete bitmap has {} bytes, expected {}",
                nbytes,
                (count + 7) / 8
            )));
        }
        ensure_remaining(&buf, nbytes)?;
        let flags = Bitset::from_bytes(&buf[..nbytes], count);
        buf.advance(nbytes);
        for i in flags.iter_ones() {
            tomb.stones[i].is_delete = true;
        }

        tomb.max_xid = prev_xid;
        Ok(tomb)
    }
}

fn offset(base: u64, delta: u64) -> Result<u64> {
    base.checked_add(delta)
        .ok_or_else(|| JournalError::Decode("tombstone delta overflows u64".to_string()))
}
