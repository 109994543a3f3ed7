//! WAL Record definitions
//!
//! Defines the structure of individual WAL records and their framing.

use serde::{Deserialize, Serialize};

use crate::error::{JournalError, Result};
use crate::types::{Lsn, Xid};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest accepted record body (64 MB)
pub(crate) const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Kinds of records written by the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Insert,
    Update,
    Delete,
    Commit,
    Abort,
    Checkpoint,
}

/// A single WAL record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Log Sequence Number, assigned on write (0 before)
    pub lsn: Lsn,

    /// Record type
    pub kind: RecordType,

    /// Owning table entity
    pub entity: u64,

    /// Writing transaction (0 for checkpoints)
    pub xid: Xid,

    /// Opaque record payload
    pub payload: Vec<u8>,
}

/// Frame body as written by bincode
type Body = (RecordType, u64, Xid, Vec<u8>);

impl WalRecord {
    pub fn new(kind: RecordType, entity: u64, xid: Xid, payload: Vec<u8>) -> Self {
        Self {
            lsn: 0,
            kind,
            entity,
            xid,
            payload,
        }
    }

    /// Encode as a checksummed frame
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(&(self.kind, self.entity, self.xid, &self.payload))?;
        if body.len() > MAX_BODY_SIZE {
            return Err(JournalError::WalWrite(format!(
                "record body too large: {} bytes",
                body.len()
            )));
        }
        let crc = crc32fast::hash(&body);
        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&self.lsn.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one frame from the start of `bytes`, returns the record and
    /// the number of bytes consumed.
    ///
    /// A frame cut short yields `ShortBuffer`, a checksum mismatch yields
    /// `WalCorruption`.
    pub fn deserialize(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(JournalError::ShortBuffer {
                need: HEADER_SIZE,
                have: bytes.len(),
            });
        }
        let lsn = u64::from_le_bytes(bytes[0..8].try_into().map_err(|_| short(8, bytes))?);
        let crc = u32::from_le_bytes(bytes[8..12].try_into().map_err(|_| short(12, bytes))?);
        let len = u32::from_le_bytes(bytes[12..16].try_into().map_err(|_| short(16, bytes))?) as usize;
        if len > MAX_BODY_SIZE {
            return Err(JournalError::WalCorruption(format!(
                "record at lsn {} claims {} byte body",
                lsn, len
            )));
        }
        let total = HEADER_SIZE + len;
        if bytes.len() < total {
            return Err(short(total, bytes));
        }
        let body = &bytes[HEADER_SIZE..total];
        if crc32fast::hash(body) != crc {
            return Err(JournalError::WalCorruption(format!(
                "CRC mismatch at lsn {}",
                lsn
            )));
        }
        let (kind, entity, xid, payload): Body = bincode::deserialize(body)?;
        Ok((
            Self {
                lsn,
                kind,
                entity,
                xid,
                payload,
            },
            total,
        ))
    }
}

fn short(need: usize, bytes: &[u8]) -> JournalError {
    JournalError::ShortBuffer {
        need,
        have: bytes.len(),
    }
}
