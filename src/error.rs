//! Error types for mvjournal
//!
//! One error enum shared by the journal, WAL, table and engine.

use thiserror::Error;

/// Result type alias using JournalError
pub type Result<T> = std::result::Result<T, JournalError>;

/// Unified error type for journal operations
#[derive(Debug, Error)]
pub enum JournalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Decoding Errors
    // -------------------------------------------------------------------------
    #[error("short buffer: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    #[error("Decode error: {0}")]
    Decode(String),

    // -------------------------------------------------------------------------
    // Replay / Consistency Errors
    // -------------------------------------------------------------------------
    #[error("replay rid mismatch: expected {expected}, found {found}")]
    RidMismatch { expected: u64, found: u64 },

    #[error("replay pk mismatch: expected {expected}, found {found}")]
    PkMismatch { expected: u64, found: u64 },

    #[error("journal capacity exceeded: {need} records, {available} available")]
    Capacity { need: usize, available: usize },

    // -------------------------------------------------------------------------
    // Merge Scheduling
    // -------------------------------------------------------------------------
    #[error("merge in progress, try again")]
    Again,

    // -------------------------------------------------------------------------
    // Schema Errors
    // -------------------------------------------------------------------------
    #[error("Schema error: {0}")]
    Schema(String),

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("another write transaction is active: xid {0}")]
    WriterBusy(u64),

    #[error("transaction {0} is read-only")]
    ReadOnly(u64),

    #[error("record not found: pk {0}")]
    NotFound(u64),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for JournalError {
    fn from(e: bincode::Error) -> Self {
        JournalError::Serialization(e.to_string())
    }
}
