//! Journal deletes
//!
//! Deletes only add tombstones. WAL payload: the deleted rids as
//! consecutive unsigned varints.

use tracing::debug;

use crate::codec::put_uvarint;
use crate::error::Result;
use crate::pack::DataPack;
use crate::types::Rid;
use crate::wal::{RecordType, WalRecord};

use super::{Journal, WriteCtx};

impl Journal {
    /// Delete the row versions named by the selected rids of `src`
    pub fn delete_pack(&mut self, ctx: &mut WriteCtx<'_>, src: &DataPack) -> Result<usize> {
        let rids: Vec<Rid> = src
            .positions()
            .into_iter()
            .map(|i| src.rid(i as usize))
            .collect();
        self.delete_rids(ctx, &rids)
    }

    /// Delete row versions by rid, returns the number deleted
    pub fn delete_rids(&mut self, ctx: &mut WriteCtx<'_>, rids: &[Rid]) -> Result<usize> {
        let xid = ctx.xid;
        let mut rest = rids;
        let mut msg = Vec::new();

        while !rest.is_empty() {
            self.rotate_and_checkpoint(ctx)?;

            let n = rest.len().min(self.capacity());
            msg.clear();
            for &rid in &rest[..n] {
                put_uvarint(&mut msg, rid);
                self.tip.notify_delete(xid, rid);
                self.tip.tstate.apply_rows_diff(-1);
            }
            debug!(xid, segment = self.tip.id(), n, "journal delete");

            if let Some(wal) = ctx.wal.as_deref_mut() {
                wal.write(&WalRecord::new(RecordType::Delete, self.entity, xid, msg.clone()))?;
            }
            rest = &rest[n..];
            self.rotate_and_checkpoint(ctx)?;
        }

        Ok(rids.len())
    }
}
