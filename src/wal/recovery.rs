//! WAL Recovery
//!
//! Reads every intact record of a WAL file and cuts off a torn or corrupt
//! tail so that new appends continue from the last good record.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::warn;

use crate::error::{JournalError, Result};
use crate::types::Lsn;

use super::{WalReader, WalRecord};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of records successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted frames found (recovery stops at the first)
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: Lsn,

    /// Whether the WAL was truncated (partial or corrupt tail removed)
    pub was_truncated: bool,

    /// Byte length of the valid prefix
    pub valid_len: u64,
}

impl WalRecovery {
    /// Recover records from a WAL file
    ///
    /// This will:
    /// 1. Read all valid records in order
    /// 2. Stop at the first torn or corrupted frame
    /// 3. Truncate the file to the valid prefix
    /// 4. Return the valid records
    pub fn recover(path: &Path) -> Result<(Vec<WalRecord>, RecoveryResult)> {
        let (records, result) = Self::scan(path)?;
        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                valid_len = result.valid_len,
                "truncated damaged WAL tail"
            );
        }
        Ok((records, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::scan(path).map(|(_, result)| result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalRecord>, RecoveryResult)> {
        let file_len = std::fs::metadata(path)?.len();
        let mut reader = WalReader::open(path)?;
        let mut records = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_record() {
                Ok(Some(record)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = record.lsn;
                    records.push(record);
                }
                Ok(None) => break,
                Err(JournalError::ShortBuffer { .. }) => break,
                Err(JournalError::WalCorruption(_)) | Err(JournalError::Serialization(_)) => {
                    result.entries_corrupted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        result.valid_len = reader.position();
        result.was_truncated = result.valid_len < file_len;
        Ok((records, result))
    }
}
