//! Append-only writer for a new increment file.

use crate::chain::record::{IncrementHeader, RecordHeader};
use crate::error::{IoResultExt, Result, SyncError};
use crate::hash::BlockHash;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Exclusively owned, append-only increment.
///
/// The file is created with `create_new`, so an existing increment is never
/// reopened for writing. The header is on disk as soon as `create`
/// returns; records reach the file on `seal` or `abandon`.
pub struct IncrementWriter {
    path: PathBuf,
    file: BufWriter<File>,
    block_size: u64,
    last_offset: Option<u64>,
    records: u64,
    bytes: u64,
}

impl IncrementWriter {
    pub async fn create(path: &Path, header: &IncrementHeader) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .io_context(|| format!("creating increment {}", path.display()))?;

        let mut file = BufWriter::new(file);
        file.write_all(&header.encode())
            .await
            .io_context(|| format!("writing header of {}", path.display()))?;
        // a session that dies early still leaves a valid, empty increment
        file.flush()
            .await
            .io_context(|| format!("writing header of {}", path.display()))?;
        file.get_ref()
            .sync_all()
            .await
            .io_context(|| format!("syncing header of {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            block_size: header.block_size(),
            last_offset: None,
            records: 0,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Append one record. Offsets must be block aligned and increasing.
    pub async fn append(&mut self, offset: u64, hash: &BlockHash, data: &[u8]) -> Result<()> {
        if offset % self.block_size != 0 || data.len() as u64 > self.block_size {
            return Err(SyncError::chain(
                &self.path,
                format!(
                    "record at offset {} with {} bytes does not fit block size {}",
                    offset,
                    data.len(),
                    self.block_size
                ),
            ));
        }
        if self.last_offset.is_some_and(|last| offset <= last) {
            return Err(SyncError::chain(
                &self.path,
                format!("offset {} written out of order", offset),
            ));
        }

        let header = RecordHeader {
            offset,
            hash: *hash,
        };
        self.file
            .write_all(&header.encode())
            .await
            .io_context(|| format!("appending offset {} to {}", offset, self.path.display()))?;
        self.file
            .write_all(data)
            .await
            .io_context(|| format!("appending offset {} to {}", offset, self.path.display()))?;

        self.last_offset = Some(offset);
        self.records += 1;
        self.bytes += data.len() as u64;
        Ok(())
    }

    /// Flush the records appended so far and close without syncing.
    ///
    /// Used when a session aborts; every complete record stays readable.
    pub async fn abandon(mut self) -> Result<u64> {
        self.file
            .flush()
            .await
            .io_context(|| format!("flushing {}", self.path.display()))?;
        tracing::warn!(
            path = %self.path.display(),
            records = self.records,
            "closed unfinished increment"
        );
        Ok(self.records)
    }

    /// Flush, fsync and close. Returns the number of records written.
    pub async fn seal(mut self) -> Result<u64> {
        self.file
            .flush()
            .await
            .io_context(|| format!("flushing {}", self.path.display()))?;
        self.file
            .get_ref()
            .sync_all()
            .await
            .io_context(|| format!("syncing {}", self.path.display()))?;

        tracing::debug!(
            path = %self.path.display(),
            records = self.records,
            bytes = self.bytes,
            "sealed increment"
        );
        Ok(self.records)
    }
}
