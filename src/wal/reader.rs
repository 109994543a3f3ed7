//! WAL Reader
//!
//! Reads records from a WAL file in LSN order.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{JournalError, Result};

use super::entry::MAX_BODY_SIZE;
use super::{WalRecord, HEADER_SIZE};

/// Sequential reader over a WAL file
pub struct WalReader {
    reader: BufReader<File>,
    /// Byte offset of the next frame
    position: u64,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Byte offset just past the last fully read record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at a clean end of file, `ShortBuffer` for a torn
    /// tail and `WalCorruption` for a checksum mismatch.
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        let mut header = [0u8; HEADER_SIZE];
        let n = read_full(&mut self.reader, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            return Err(JournalError::ShortBuffer {
                need: HEADER_SIZE,
                have: n,
            });
        }
        let len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]) as usize;
        if len > MAX_BODY_SIZE {
            return Err(JournalError::WalCorruption(format!(
                "frame at offset {} claims {} byte body",
                self.position, len
            )));
        }
        let mut frame = Vec::with_capacity(HEADER_SIZE + len);
        frame.extend_from_slice(&header);
        frame.resize(HEADER_SIZE + len, 0);
        let got = read_full(&mut self.reader, &mut frame[HEADER_SIZE..])?;
        if got < len {
            return Err(JournalError::ShortBuffer {
                need: HEADER_SIZE + len,
                have: HEADER_SIZE + got,
            });
        }
        let (record, consumed) = WalRecord::deserialize(&frame)?;
        self.position += consumed as u64;
        Ok(Some(record))
    }
}

impl Iterator for WalReader {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Read until `buf` is full or EOF, returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}
