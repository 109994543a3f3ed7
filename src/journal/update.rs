//! Journal updates
//!
//! An update appends the full post-image under a fresh rid and marks the
//! prior version (its ref) with a tombstone. The WAL record only carries
//! the changed columns:
//!
//! ```text
//! ┌───────────────┬─────────────────┬──────────┬─────────────────┬─────┐
//! │ changeset     │ first rid (var) │ ref1     │ changed fields1 │ ... │
//! │ (nfields+7)/8 │                 │ (var)    │                 │     │
//! └───────────────┴─────────────────┴──────────┴─────────────────┴─────┘
//!   all changeset bits set = full wire records
//! ```

use tracing::debug;

use crate::bitset::Bitset;
use crate::codec::put_uvarint;
use crate::error::Result;
use crate::pack::DataPack;
use crate::wal::{RecordType, WalRecord};

use super::{Journal, WriteCtx};

impl Journal {
    /// Write new versions of the selected rows of `src`. Rids in `src` name
    /// the versions being replaced, dirty columns form the changeset.
    ///
    /// Returns the number of updated rows.
    pub fn update_pack(&mut self, ctx: &mut WriteCtx<'_>, src: &DataPack) -> Result<usize> {
        let xid = ctx.xid;
        let nfields = self.schema.num_fields();
        let mut changed = src.dirty_columns();
        if changed.is_empty() {
            changed = (0..nfields).collect();
        }
        let full = changed.len() == nfields;
        let mut changeset = Bitset::new(nfields);
        for &i in &changed {
            changeset.set(i);
        }
        let changeset = changeset.to_bytes();

        let positions = src.positions();
        let mut rest = positions.as_slice();
        let mut count = 0;
        let mut msg = Vec::new();
        let mut wire = Vec::new();

        while !rest.is_empty() {
            self.rotate_and_checkpoint(ctx)?;

            let n = rest.len().min(self.capacity());
            let first_rid = self.tip.tstate.next_rid;
            msg.clear();
            msg.extend_from_slice(&changeset);
            put_uvarint(&mut msg, first_rid);

            for &pos in &rest[..n] {
                let i = pos as usize;
                let ref_id = src.rid(i);
                put_uvarint(&mut msg, ref_id);
                if full {
                    src.read_wire(i, &mut msg);
                } else {
                    src.read_fields(i, &changed, &mut msg);
                }

                wire.clear();
                src.read_wire(i, &mut wire);
                let rid = self.tip.tstate.next_rid;
                self.tip.update_record(xid, rid, ref_id, &wire)?;
                self.tip.tstate.next_rid += 1;
            }
            debug!(xid, segment = self.tip.id(), n, first_rid, full, "journal update");

            if let Some(wal) = ctx.wal.as_deref_mut() {
                wal.write(&WalRecord::new(RecordType::Update, self.entity, xid, msg.clone()))?;
            }
            count += n;
            rest = &rest[n..];
            self.rotate_and_checkpoint(ctx)?;
        }

        Ok(count)
    }
}
