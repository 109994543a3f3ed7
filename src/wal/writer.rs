//! WAL Writer
//!
//! Appends framed records to a WAL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{JournalError, Result};
use crate::types::Lsn;

use super::{Wal, WalRecord, WalRecovery};

/// Writes records to the WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// LSN of the last appended record
    current_lsn: Lsn,
}

impl WalWriter {
    /// Open or create a WAL file, continuing after its last valid record
    pub fn open(path: &Path) -> Result<Self> {
        let current_lsn = if path.exists() {
            WalRecovery::recover(path)?.1.last_lsn
        } else {
            0
        };
        Self::open_at(path, current_lsn)
    }

    /// Open for appending when the last LSN is already known
    pub fn open_at(path: &Path, current_lsn: Lsn) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            current_lsn,
        })
    }

    /// Append a record, returns its LSN
    ///
    /// The buffered frame is flushed to the OS before returning so a
    /// reader opened afterwards sees it.
    pub fn append(&mut self, record: &WalRecord) -> Result<Lsn> {
        let lsn = self.current_lsn + 1;
        let mut rec = record.clone();
        rec.lsn = lsn;
        let frame = rec.serialize()?;
        self.writer
            .write_all(&frame)
            .and_then(|_| self.writer.flush())
            .map_err(|e| JournalError::WalWrite(e.to_string()))?;
        self.current_lsn = lsn;
        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Get the current LSN
    pub fn current_lsn(&self) -> Lsn {
        self.current_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Wal for WalWriter {
    fn write(&mut self, record: &WalRecord) -> Result<Lsn> {
        self.append(record)
    }
}
