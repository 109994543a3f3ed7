//! # mvjournal
//!
//! A multi-version in-memory write journal for table storage with:
//! - Snapshot-isolated reads over uncommitted and committed row versions
//! - Tombstones for deletes and replaced versions
//! - Write-Ahead Logging (WAL) with segment checkpoints and replay
//! - Transaction abort with exact counter rollback
//! - Oldest-first merging of complete segments into table storage
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │          (Transactions, Single Writer / Multi Reader)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────────────────────┐
//!   │     WAL     │◄─────────│           Journal            │
//!   │  (Append)   │ records  │  tip ─► seg ─► seg (oldest)  │
//!   └─────────────┘          │  DataPack + Tomb per segment │
//!                            └──────────────┬───────────────┘
//!                                           │ merge
//!                                           ▼
//!                                   ┌─────────────┐
//!                                   │ TableStore  │
//!                                   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;

pub mod codec;
pub mod bitset;
pub mod schema;
pub mod pack;
pub mod filter;

pub mod wal;
pub mod journal;
pub mod table;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{JournalError, Result};
pub use config::Config;
pub use engine::{Engine, EngineStats, Tx};
pub use journal::{Journal, QueryResult, Segment, SegmentState, Tomb, WriteCtx};
pub use schema::{Field, FieldType, Row, Schema, Value};
pub use types::{Lsn, Rid, SegmentId, Snapshot, TableState, Xid};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of mvjournal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
