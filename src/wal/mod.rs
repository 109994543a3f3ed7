//! Write-Ahead Log (WAL) Module
//!
//! The journal consumes the WAL only through the [`Wal`] trait:
//! `write(record) -> LSN`, plus sequential replay of records in LSN order.
//!
//! ## Responsibilities
//! - Append journal records before a write is acknowledged
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Body   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Body   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//!   Body = bincode(type, entity, xid, payload)
//! ```

mod entry;
mod memory;
mod reader;
mod recovery;
mod writer;

pub use entry::{RecordType, WalRecord, HEADER_SIZE};
pub use memory::MemoryWal;
pub use reader::WalReader;
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;

use crate::error::Result;
use crate::types::Lsn;

/// Append-only log consumed by the journal write path
pub trait Wal {
    /// Append `record` and return its LSN. The record is replayable in
    /// write order once this returns `Ok`.
    fn write(&mut self, record: &WalRecord) -> Result<Lsn>;
}
