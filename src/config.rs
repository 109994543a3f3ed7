//! Configuration for mvjournal
//!
//! Table and journal settings, built with `Config::builder()`.

use std::path::PathBuf;

use crate::error::{JournalError, Result};

/// Main configuration for a journaled table
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── journal.wal      (write-ahead log)
    pub data_dir: PathBuf,

    /// Entity id of the owning table, stamped on every WAL record
    pub entity: u64,

    // -------------------------------------------------------------------------
    // Journal Configuration
    // -------------------------------------------------------------------------
    /// Max number of data rows (or tombstones) per journal segment
    pub journal_max_size: usize,

    /// Max number of tail segments before a merge is forced
    pub journal_max_segments: usize,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Whether new write transactions log to the WAL unless told otherwise
    pub use_wal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./mvjournal_data"),
            entity: 1,
            journal_max_size: 1 << 16,
            journal_max_segments: 8,
            use_wal: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the journal cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.journal_max_size == 0 {
            return Err(JournalError::Config(
                "journal_max_size must be greater than zero".to_string(),
            ));
        }
        if self.journal_max_segments == 0 {
            return Err(JournalError::Config(
                "journal_max_segments must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Directory holding `journal.wal`
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the owning table entity id
    pub fn entity(mut self, entity: u64) -> Self {
        self.config.entity = entity;
        self
    }

    /// Set the max number of records per journal segment
    pub fn journal_max_size(mut self, size: usize) -> Self {
        self.config.journal_max_size = size;
        self
    }

    /// Set the max number of tail segments
    pub fn journal_max_segments(mut self, count: usize) -> Self {
        self.config.journal_max_segments = count;
        self
    }

    /// Set the default WAL mode for write transactions
    pub fn use_wal(mut self, enabled: bool) -> Self {
        self.config.use_wal = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
