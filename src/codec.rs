//! Variable-length integer codec
//!
//! Unsigned LEB128 varints as used by tombstone persistence and WAL
//! payloads.
//!
//! ## Format
//! ```text
//! ┌────────────┬────────────┬─────┬────────────┐
//! │ 1xxxxxxx   │ 1xxxxxxx   │ ... │ 0xxxxxxx   │
//! └────────────┴────────────┴─────┴────────────┘
//!   low 7 bits first, high bit = continuation
//! ```

use bytes::{Buf, BufMut};

use crate::error::{JournalError, Result};

/// Maximum encoded size of a u64 varint
pub const MAX_VARINT_LEN64: usize = 10;

/// Append `v` as an unsigned varint
pub fn put_uvarint<B: BufMut>(buf: &mut B, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

/// Encode `v` into a fresh vector
pub fn encode_uvarint(v: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN64);
    put_uvarint(&mut buf, v);
    buf
}

/// Read an unsigned varint, advancing `buf`
///
/// Fails with `ShortBuffer` when the input ends mid-value and with
/// `Decode` when the value overflows 64 bits.
pub fn get_uvarint<B: Buf>(buf: &mut B) -> Result<u64> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN64 {
        if !buf.has_remaining() {
            return Err(JournalError::ShortBuffer {
                need: i + 1,
                have: i,
            });
        }
        let b = buf.get_u8();
        if i == MAX_VARINT_LEN64 - 1 && b > 1 {
            return Err(JournalError::Decode("varint overflows u64".to_string()));
        }
        v |= ((b & 0x7f) as u64) << shift;
        if b < 0x80 {
            return Ok(v);
        }
        shift += 7;
    }
    Err(JournalError::Decode("varint overflows u64".to_string()))
}

/// Require at least `n` more bytes in `buf`
pub fn ensure_remaining<B: Buf>(buf: &B, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(JournalError::ShortBuffer {
            need: n,
            have: buf.remaining(),
        });
    }
    Ok(())
}
