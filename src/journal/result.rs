//! Query Result
//!
//! Merge view over journal segments: shared references to segment data
//! plus a selection vector per segment, and the set of rids deleted or
//! replaced by transactions visible to the query snapshot.
//!
//! Dropping a result releases the selection vectors only. Segment data is
//! shared through `Arc` and copied on write, so a held result never
//! observes later journal writes.

use std::sync::Arc;

use crate::pack::DataPack;
use crate::schema::Row;
use crate::types::{Rid, RidSet, SegmentId};

/// Matching rows of one segment
#[derive(Debug, Clone)]
pub struct ResultPart {
    pub segment: SegmentId,
    pub data: Arc<DataPack>,
    pub selection: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    deleted: RidSet,
    parts: Vec<ResultPart>,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rids deleted or replaced under the query snapshot. Consumers use it
    /// to hide table rows that the journal supersedes.
    pub fn deleted(&self) -> &RidSet {
        &self.deleted
    }

    pub(crate) fn deleted_mut(&mut self) -> &mut RidSet {
        &mut self.deleted
    }

    pub fn is_deleted(&self, rid: Rid) -> bool {
        self.deleted.contains(rid)
    }

    pub(crate) fn append(&mut self, segment: SegmentId, data: Arc<DataPack>, selection: Vec<u32>) {
        self.parts.push(ResultPart {
            segment,
            data,
            selection,
        });
    }

    /// Per-segment matches, newest segment first
    pub fn parts(&self) -> &[ResultPart] {
        &self.parts
    }

    /// Total number of matching rows
    pub fn len(&self) -> usize {
        self.parts.iter().map(|p| p.selection.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| p.selection.is_empty())
    }

    /// Iterate matching rows as (pack, row position)
    pub fn iter(&self) -> impl Iterator<Item = (&DataPack, usize)> + '_ {
        self.parts.iter().flat_map(|p| {
            p.selection
                .iter()
                .map(move |&i| (p.data.as_ref(), i as usize))
        })
    }

    pub fn pks(&self) -> Vec<u64> {
        self.iter().map(|(pack, i)| pack.pk(i)).collect()
    }

    pub fn rids(&self) -> Vec<Rid> {
        self.iter().map(|(pack, i)| pack.rid(i)).collect()
    }

    /// Decode all matching rows
    pub fn rows(&self) -> Vec<Row> {
        self.iter().map(|(pack, i)| pack.row(i)).collect()
    }
}
