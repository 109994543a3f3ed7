//! Schema and Wire Format
//!
//! Typed field layout shared by the journal, the data pack and WAL payloads.
//! Field 0 is always the `u64` primary key.
//!
//! ## Wire Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────┬─────┐
//! │ pk (8)   │ u64/i64/ │ Bytes: len (4) + data   │ ... │
//! │          │ f64 (8)  │                         │     │
//! └──────────┴──────────┴─────────────────────────┴─────┘
//!   all integers little-endian, fields in schema order
//! ```

use std::cmp::Ordering;

use crate::error::{JournalError, Result};

/// Size of fixed-width field values on the wire
const FIXED_SIZE: usize = 8;

/// Size of the length prefix of variable-width fields
const LEN_PREFIX: usize = 4;

// =============================================================================
// Field Types and Values
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U64,
    I64,
    F64,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Nominal wire size, used to dimension WAL buffers
    pub fn wire_size(&self) -> usize {
        match self.kind {
            FieldType::Bytes => LEN_PREFIX + 16,
            _ => FIXED_SIZE,
        }
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U64(u64),
    I64(i64),
    F64(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> FieldType {
        match self {
            Value::U64(_) => FieldType::U64,
            Value::I64(_) => FieldType::I64,
            Value::F64(_) => FieldType::F64,
            Value::Bytes(_) => FieldType::Bytes,
        }
    }

    /// Order two values of the same type, `None` across types or for NaN
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::U64(a), Value::U64(b)) => Some(a.cmp(b)),
            (Value::I64(a), Value::I64(b)) => Some(a.cmp(b)),
            (Value::F64(a), Value::F64(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }
}

/// One decoded record, values in schema order
pub type Row = Vec<Value>;

// =============================================================================
// Schema
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
}

impl Schema {
    /// Create a schema; field 0 must be the `u64` primary key
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        match fields.first() {
            Some(f) if f.kind == FieldType::U64 => {}
            Some(f) => {
                return Err(JournalError::Schema(format!(
                    "primary key field '{}' must be u64",
                    f.name
                )))
            }
            None => return Err(JournalError::Schema("schema has no fields".to_string())),
        }
        Ok(Self {
            name: name.into(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn average_size(&self) -> usize {
        self.fields.iter().map(Field::wire_size).sum()
    }

    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------

    /// Append the wire encoding of `row` to `buf`
    pub fn encode_row(&self, row: &[Value], buf: &mut Vec<u8>) -> Result<()> {
        if row.len() != self.fields.len() {
            return Err(JournalError::Schema(format!(
                "row has {} values, schema '{}' has {} fields",
                row.len(),
                self.name,
                self.fields.len()
            )));
        }
        for (field, value) in self.fields.iter().zip(row) {
            if field.kind != value.kind() {
                return Err(JournalError::Schema(format!(
                    "field '{}' expects {:?}, got {:?}",
                    field.name,
                    field.kind,
                    value.kind()
                )));
            }
            encode_value(value, buf);
        }
        Ok(())
    }

    /// Encode many rows back to back
    pub fn encode_rows(&self, rows: &[Row]) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(rows.len() * self.average_size());
        for row in rows {
            self.encode_row(row, &mut buf)?;
        }
        Ok(buf)
    }

    /// Decode exactly one record occupying all of `buf`
    pub fn decode_row(&self, buf: &[u8]) -> Result<Row> {
        let mut row = Vec::with_capacity(self.fields.len());
        let mut pos = 0;
        for i in 0..self.fields.len() {
            let (value, n) = self.read_value(i, &buf[pos..])?;
            row.push(value);
            pos += n;
        }
        if pos != buf.len() {
            return Err(JournalError::Decode(format!(
                "{} trailing bytes after record",
                buf.len() - pos
            )));
        }
        Ok(row)
    }

    /// Decode a single field value from the start of `buf`
    pub fn read_value(&self, field: usize, buf: &[u8]) -> Result<(Value, usize)> {
        let raw = self.field_slice(field, buf)?;
        let value = match self.fields[field].kind {
            FieldType::U64 => Value::U64(read_u64(raw)),
            FieldType::I64 => Value::I64(read_u64(raw) as i64),
            FieldType::F64 => Value::F64(f64::from_bits(read_u64(raw))),
            FieldType::Bytes => Value::Bytes(raw[LEN_PREFIX..].to_vec()),
        };
        Ok((value, raw.len()))
    }

    /// Wire slice of one field at the start of `buf` (including length prefix)
    pub fn field_slice<'a>(&self, field: usize, buf: &'a [u8]) -> Result<&'a [u8]> {
        let n = match self.fields[field].kind {
            FieldType::Bytes => {
                check_len(buf, LEN_PREFIX)?;
                let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                LEN_PREFIX + len
            }
            _ => FIXED_SIZE,
        };
        check_len(buf, n)?;
        Ok(&buf[..n])
    }

    /// Length of the first wire record in `buf`
    pub fn record_len(&self, buf: &[u8]) -> Result<usize> {
        let mut pos = 0;
        for i in 0..self.fields.len() {
            pos += self.field_slice(i, &buf[pos..])?.len();
        }
        Ok(pos)
    }

    /// Split the first wire record from `buf`, returns (record, rest)
    pub fn cut<'a>(&self, buf: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        let n = self.record_len(buf)?;
        Ok(buf.split_at(n))
    }

    /// Split a wire record into per-field slices
    pub fn split_fields<'a>(&self, wire: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let mut out = Vec::with_capacity(self.fields.len());
        let mut pos = 0;
        for i in 0..self.fields.len() {
            let raw = self.field_slice(i, &wire[pos..])?;
            pos += raw.len();
            out.push(raw);
        }
        Ok(out)
    }

    /// Read the primary key of a wire record
    pub fn get_pk(&self, wire: &[u8]) -> Result<u64> {
        check_len(wire, FIXED_SIZE)?;
        Ok(read_u64(wire))
    }

    /// Overwrite the primary key of a wire record in place
    pub fn set_pk(&self, wire: &mut [u8], pk: u64) -> Result<()> {
        check_len(wire, FIXED_SIZE)?;
        wire[..FIXED_SIZE].copy_from_slice(&pk.to_le_bytes());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Partial Records (update changesets)
    // -------------------------------------------------------------------------

    /// Append only the `changed` fields of a full wire record
    pub fn encode_fields(&self, wire: &[u8], changed: &[usize], buf: &mut Vec<u8>) -> Result<()> {
        let parts = self.split_fields(wire)?;
        for &i in changed {
            buf.extend_from_slice(parts[i]);
        }
        Ok(())
    }

    /// Length of a partial record holding only `changed` fields
    pub fn fields_len(&self, buf: &[u8], changed: &[usize]) -> Result<usize> {
        let mut pos = 0;
        for &i in changed {
            pos += self.field_slice(i, &buf[pos..])?.len();
        }
        Ok(pos)
    }

    /// Rebuild a full wire record by replacing `changed` fields of `base`
    /// with the values from the partial record `patch`.
    pub fn patch_fields(&self, base: &[u8], patch: &[u8], changed: &[usize]) -> Result<Vec<u8>> {
        let mut parts = self.split_fields(base)?;
        let mut pos = 0;
        for &i in changed {
            let raw = self.field_slice(i, &patch[pos..])?;
            pos += raw.len();
            parts[i] = raw;
        }
        let mut out = Vec::with_capacity(base.len() + patch.len());
        for p in parts {
            out.extend_from_slice(p);
        }
        Ok(out)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn encode_value(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::U64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Value::F64(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
        Value::Bytes(v) => {
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            buf.extend_from_slice(v);
        }
    }
}

#[inline]
fn read_u64(buf: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(b)
}

#[inline]
fn check_len(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(JournalError::ShortBuffer {
            need,
            have: buf.len(),
        });
    }
    Ok(())
}
