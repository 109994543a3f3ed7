//! Filter Engine
//!
//! Minimal predicate tree and vector matcher over a [`DataPack`]. Produces
//! the candidate bitset that journal segments refine with MVCC visibility.

use std::cmp::Ordering;

use crate::bitset::Bitset;
use crate::pack::{Column, DataPack};
use crate::schema::Value;

/// Comparison operator of a leaf predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn test(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Matches every row
    All,
    /// Compare column `field` against a constant
    Cmp {
        field: usize,
        op: CmpOp,
        value: Value,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    pub fn cmp(field: usize, op: CmpOp, value: Value) -> Self {
        FilterNode::Cmp { field, op, value }
    }

    /// Shorthand for `pk == value`
    pub fn pk_eq(pk: u64) -> Self {
        FilterNode::cmp(0, CmpOp::Eq, Value::U64(pk))
    }
}

/// Evaluate `node` against every row of `pack`, writing matches into `bits`
/// (resized to the pack length).
pub fn match_tree(node: &FilterNode, pack: &DataPack, bits: &mut Bitset) {
    bits.reset(pack.len());
    match node {
        FilterNode::All => bits.set_all(),
        FilterNode::Cmp { field, op, value } => match_cmp(pack, *field, *op, value, bits),
        FilterNode::And(children) => {
            bits.set_all();
            let mut scratch = Bitset::new(pack.len());
            for child in children {
                match_tree(child, pack, &mut scratch);
                bits.and(&scratch);
                if bits.none() {
                    break;
                }
            }
        }
        FilterNode::Or(children) => {
            let mut scratch = Bitset::new(pack.len());
            for child in children {
                match_tree(child, pack, &mut scratch);
                bits.or(&scratch);
            }
        }
        FilterNode::Not(child) => {
            match_tree(child, pack, bits);
            bits.negate();
        }
    }
}

fn match_cmp(pack: &DataPack, field: usize, op: CmpOp, value: &Value, bits: &mut Bitset) {
    if field >= pack.schema().num_fields() {
        return;
    }
    // typed fast paths for fixed-width columns
    match (pack.column(field), value) {
        (Column::U64(col), Value::U64(v)) => {
            for (i, x) in col.iter().enumerate() {
                if op.test(x.cmp(v)) {
                    bits.set(i);
                }
            }
        }
        (Column::I64(col), Value::I64(v)) => {
            for (i, x) in col.iter().enumerate() {
                if op.test(x.cmp(v)) {
                    bits.set(i);
                }
            }
        }
        _ => {
            for i in 0..pack.len() {
                if let Some(ord) = pack.value(field, i).compare(value) {
                    if op.test(ord) {
                        bits.set(i);
                    }
                }
            }
        }
    }
}
