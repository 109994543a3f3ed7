//! Journal inserts
//!
//! Batches are cut into pieces that fit the tip. With WAL enabled each
//! piece is logged as one record:
//!
//! ```text
//! ┌──────────────────┬───────┬───────┬─────┐
//! │ first rid (var)  │ wire1 │ wire2 │ ... │   rids are sequential
//! └──────────────────┴───────┴───────┴─────┘
//! ```

use tracing::debug;

use crate::codec::{put_uvarint, MAX_VARINT_LEN64};
use crate::error::Result;
use crate::pack::DataPack;
use crate::wal::{RecordType, WalRecord};

use super::{Journal, WriteCtx};

impl Journal {
    /// Insert concatenated wire records, assigning fresh pks.
    ///
    /// Returns (first pk, count).
    pub fn insert_records(&mut self, ctx: &mut WriteCtx<'_>, buf: &[u8]) -> Result<(u64, usize)> {
        let schema = self.schema.clone();
        let mut rest = buf;
        self.insert_wire(ctx, |msg| {
            if rest.is_empty() {
                return Ok(false);
            }
            let (wire, tail) = schema.cut(rest)?;
            msg.extend_from_slice(wire);
            rest = tail;
            Ok(true)
        })
    }

    /// Insert the selected rows of `src` (all rows without a selection),
    /// assigning fresh pks.
    ///
    /// Returns (first pk, count).
    pub fn insert_pack(&mut self, ctx: &mut WriteCtx<'_>, src: &DataPack) -> Result<(u64, usize)> {
        let positions = src.positions();
        let mut next = positions.iter();
        self.insert_wire(ctx, |msg| match next.next() {
            Some(&i) => {
                src.read_wire(i as usize, msg);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Shared insert loop. `next` appends one wire record to the message
    /// buffer and returns false once the source is exhausted.
    fn insert_wire<F>(&mut self, ctx: &mut WriteCtx<'_>, mut next: F) -> Result<(u64, usize)>
    where
        F: FnMut(&mut Vec<u8>) -> Result<bool>,
    {
        let xid = ctx.xid;
        let first_pk = self.tip.tstate.next_pk;
        let mut count = 0;
        let mut msg = Vec::with_capacity(MAX_VARINT_LEN64 + self.schema.average_size() * 64);
        let mut exhausted = false;

        while !exhausted {
            // a replayed log may leave the tip full
            self.rotate_and_checkpoint(ctx)?;

            let cap = self.capacity();
            let first_rid = self.tip.tstate.next_rid;
            msg.clear();
            put_uvarint(&mut msg, first_rid);

            let mut n = 0;
            while n < cap {
                let start = msg.len();
                if !next(&mut msg)? {
                    exhausted = true;
                    break;
                }
                let state = self.tip.tstate;
                self.schema.set_pk(&mut msg[start..], state.next_pk)?;
                self.tip.insert_record(xid, state.next_rid, &msg[start..])?;
                let tstate = &mut self.tip.tstate;
                tstate.next_pk += 1;
                tstate.next_rid += 1;
                tstate.n_rows += 1;
                n += 1;
            }
            if n == 0 {
                break;
            }
            debug!(xid, segment = self.tip.id(), n, first_rid, "journal insert");

            if let Some(wal) = ctx.wal.as_deref_mut() {
                wal.write(&WalRecord::new(RecordType::Insert, self.entity, xid, msg.clone()))?;
            }
            count += n;
            self.rotate_and_checkpoint(ctx)?;
        }

        Ok((first_pk, count))
    }
}
