//! Data Pack
//!
//! Columnar, append-only row buffer used as journal segment storage and as
//! the source of pack-based writes (insert/update/delete from query results).
//!
//! ## Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ user columns (schema order, field 0 = pk)                │
//! │   U64 │ I64 │ F64 │ Bytes │ ...                          │
//! ├──────────────────────────────────────────────────────────┤
//! │ metadata columns                                         │
//! │   rid │ ref │ xmin │ xmax │ deleted (bitset)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A pack used as write source may carry a selection vector (rows to use)
//! and per-column dirty flags (columns changed by an update).

use std::sync::Arc;

use crate::bitset::Bitset;
use crate::error::{JournalError, Result};
use crate::schema::{FieldType, Row, Schema, Value};
use crate::types::{Rid, Xid};

/// Per-row transaction metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowMeta {
    pub rid: Rid,
    pub ref_id: Rid,
    pub xmin: Xid,
    pub xmax: Xid,
    pub deleted: bool,
}

/// One typed column
#[derive(Debug, Clone)]
pub enum Column {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bytes(Vec<Vec<u8>>),
}

impl Column {
    fn with_capacity(kind: FieldType, cap: usize) -> Self {
        match kind {
            FieldType::U64 => Column::U64(Vec::with_capacity(cap)),
            FieldType::I64 => Column::I64(Vec::with_capacity(cap)),
            FieldType::F64 => Column::F64(Vec::with_capacity(cap)),
            FieldType::Bytes => Column::Bytes(Vec::with_capacity(cap)),
        }
    }

    fn push(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (Column::U64(c), Value::U64(v)) => c.push(v),
            (Column::I64(c), Value::I64(v)) => c.push(v),
            (Column::F64(c), Value::F64(v)) => c.push(v),
            (Column::Bytes(c), Value::Bytes(v)) => c.push(v),
            (_, v) => {
                return Err(JournalError::Schema(format!(
                    "column type mismatch for value {:?}",
                    v
                )))
            }
        }
        Ok(())
    }

    fn get(&self, i: usize) -> Value {
        match self {
            Column::U64(c) => Value::U64(c[i]),
            Column::I64(c) => Value::I64(c[i]),
            Column::F64(c) => Value::F64(c[i]),
            Column::Bytes(c) => Value::Bytes(c[i].clone()),
        }
    }

    fn encode(&self, i: usize, buf: &mut Vec<u8>) {
        match self {
            Column::U64(c) => buf.extend_from_slice(&c[i].to_le_bytes()),
            Column::I64(c) => buf.extend_from_slice(&c[i].to_le_bytes()),
            Column::F64(c) => buf.extend_from_slice(&c[i].to_bits().to_le_bytes()),
            Column::Bytes(c) => {
                buf.extend_from_slice(&(c[i].len() as u32).to_le_bytes());
                buf.extend_from_slice(&c[i]);
            }
        }
    }

    fn clear(&mut self) {
        match self {
            Column::U64(c) => c.clear(),
            Column::I64(c) => c.clear(),
            Column::F64(c) => c.clear(),
            Column::Bytes(c) => c.clear(),
        }
    }

    fn heap_size(&self) -> usize {
        match self {
            Column::U64(c) => c.capacity() * 8,
            Column::I64(c) => c.capacity() * 8,
            Column::F64(c) => c.capacity() * 8,
            Column::Bytes(c) => c.iter().map(|v| v.capacity() + 24).sum(),
        }
    }
}

// =============================================================================
// Data Pack
// =============================================================================

#[derive(Debug, Clone)]
pub struct DataPack {
    schema: Arc<Schema>,
    columns: Vec<Column>,
    dirty: Vec<bool>,
    rids: Vec<Rid>,
    refs: Vec<Rid>,
    xmins: Vec<Xid>,
    xmaxs: Vec<Xid>,
    dels: Bitset,
    selected: Option<Vec<u32>>,
}

impl DataPack {
    /// Create an empty pack sized for `cap` rows
    pub fn new(schema: Arc<Schema>, cap: usize) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column::with_capacity(f.kind, cap))
            .collect();
        let dirty = vec![false; schema.num_fields()];
        Self {
            schema,
            columns,
            dirty,
            rids: Vec::with_capacity(cap),
            refs: Vec::with_capacity(cap),
            xmins: Vec::with_capacity(cap),
            xmaxs: Vec::with_capacity(cap),
            dels: Bitset::new(0),
            selected: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rids.is_empty()
    }

    // -------------------------------------------------------------------------
    // Append
    // -------------------------------------------------------------------------

    /// Append one wire-encoded record with its metadata
    pub fn append_wire(&mut self, wire: &[u8], meta: RowMeta) -> Result<()> {
        let row = self.schema.decode_row(wire)?;
        self.append_row(row, meta)
    }

    /// Append one decoded record with its metadata
    pub fn append_row(&mut self, row: Row, meta: RowMeta) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(JournalError::Schema(format!(
                "row has {} values, pack has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (col, value) in self.columns.iter_mut().zip(row) {
            col.push(value)?;
        }
        self.rids.push(meta.rid);
        self.refs.push(meta.ref_id);
        self.xmins.push(meta.xmin);
        self.xmaxs.push(meta.xmax);
        self.dels.push(meta.deleted);
        Ok(())
    }

    pub fn clear(&mut self) {
        for c in self.columns.iter_mut() {
            c.clear();
        }
        self.rids.clear();
        self.refs.clear();
        self.xmins.clear();
        self.xmaxs.clear();
        self.dels.reset(0);
        self.selected = None;
        self.dirty.iter_mut().for_each(|d| *d = false);
    }

    // -------------------------------------------------------------------------
    // Metadata Accessors
    // -------------------------------------------------------------------------

    pub fn pk(&self, i: usize) -> u64 {
        match &self.columns[0] {
            Column::U64(c) => c[i],
            _ => 0,
        }
    }

    pub fn pks(&self) -> &[u64] {
        match &self.columns[0] {
            Column::U64(c) => c,
            _ => &[],
        }
    }

    pub fn rid(&self, i: usize) -> Rid {
        self.rids[i]
    }

    pub fn rids(&self) -> &[Rid] {
        &self.rids
    }

    pub fn ref_id(&self, i: usize) -> Rid {
        self.refs[i]
    }

    pub fn xmin(&self, i: usize) -> Xid {
        self.xmins[i]
    }

    pub fn xmins(&self) -> &[Xid] {
        &self.xmins
    }

    pub fn xmax(&self, i: usize) -> Xid {
        self.xmaxs[i]
    }

    pub fn xmaxs(&self) -> &[Xid] {
        &self.xmaxs
    }

    pub fn is_deleted(&self, i: usize) -> bool {
        self.dels.contains(i)
    }

    pub fn dels(&self) -> &Bitset {
        &self.dels
    }

    pub fn meta(&self, i: usize) -> RowMeta {
        RowMeta {
            rid: self.rids[i],
            ref_id: self.refs[i],
            xmin: self.xmins[i],
            xmax: self.xmaxs[i],
            deleted: self.dels.contains(i),
        }
    }

    pub fn set_pk(&mut self, i: usize, pk: u64) {
        if let Column::U64(c) = &mut self.columns[0] {
            c[i] = pk;
        }
    }

    pub fn set_rid(&mut self, i: usize, rid: Rid) {
        self.rids[i] = rid;
    }

    pub fn set_xmin(&mut self, i: usize, xid: Xid) {
        self.xmins[i] = xid;
    }

    pub fn set_xmax(&mut self, i: usize, xid: Xid) {
        self.xmaxs[i] = xid;
    }

    pub fn set_deleted(&mut self, i: usize, deleted: bool) {
        if deleted {
            self.dels.set(i);
        } else {
            self.dels.unset(i);
        }
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    pub fn value(&self, col: usize, i: usize) -> Value {
        self.columns[col].get(i)
    }

    pub fn column(&self, col: usize) -> &Column {
        &self.columns[col]
    }

    /// Decode row `i` into values
    pub fn row(&self, i: usize) -> Row {
        self.columns.iter().map(|c| c.get(i)).collect()
    }

    /// Append the wire encoding of row `i` to `buf`
    pub fn read_wire(&self, i: usize, buf: &mut Vec<u8>) {
        for c in &self.columns {
            c.encode(i, buf);
        }
    }

    /// Append the wire encoding of the `changed` fields of row `i`
    pub fn read_fields(&self, i: usize, changed: &[usize], buf: &mut Vec<u8>) {
        for &col in changed {
            self.columns[col].encode(i, buf);
        }
    }

    // -------------------------------------------------------------------------
    // Write Source Helpers
    // -------------------------------------------------------------------------

    pub fn selected(&self) -> Option<&[u32]> {
        self.selected.as_deref()
    }

    pub fn with_selection(mut self, sel: Vec<u32>) -> Self {
        self.selected = Some(sel);
        self
    }

    pub fn set_selection(&mut self, sel: Option<Vec<u32>>) {
        self.selected = sel;
    }

    /// Row positions to process: the selection vector or all rows
    pub fn positions(&self) -> Vec<u32> {
        match &self.selected {
            Some(sel) => sel.clone(),
            None => (0..self.len() as u32).collect(),
        }
    }

    /// Overwrite a user column value and mark the column dirty
    pub fn update_value(&mut self, col: usize, i: usize, value: Value) -> Result<()> {
        match (&mut self.columns[col], value) {
            (Column::U64(c), Value::U64(v)) => c[i] = v,
            (Column::I64(c), Value::I64(v)) => c[i] = v,
            (Column::F64(c), Value::F64(v)) => c[i] = v,
            (Column::Bytes(c), Value::Bytes(v)) => c[i] = v,
            (_, v) => {
                return Err(JournalError::Schema(format!(
                    "column {} type mismatch for value {:?}",
                    col, v
                )))
            }
        }
        self.dirty[col] = true;
        Ok(())
    }

    pub fn set_dirty(&mut self, col: usize) {
        self.dirty[col] = true;
    }

    pub fn set_all_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = true);
    }

    pub fn is_dirty(&self, col: usize) -> bool {
        self.dirty[col]
    }

    /// Positions of dirty columns in schema order
    pub fn dirty_columns(&self) -> Vec<usize> {
        self.dirty
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.then_some(i))
            .collect()
    }

    pub fn heap_size(&self) -> usize {
        let meta = (self.rids.capacity()
            + self.refs.capacity()
            + self.xmins.capacity()
            + self.xmaxs.capacity())
            * 8;
        let cols: usize = self.columns.iter().map(Column::heap_size).sum();
        meta + cols + self.dels.heap_size()
    }
}
