//! Forward-only reader over one increment file.

use crate::chain::record::{IncrementHeader, RecordHeader, RECORD_HEADER_LEN};
use crate::error::{IoResultExt, Result, SyncError};
use crate::hash::BlockHash;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::trace;

/// Cursor over the sparse record stream of a single increment.
///
/// Once the record stream is exhausted the file is closed and the cursor
/// reports EOF for good.
pub struct IncrementCursor {
    path: PathBuf,
    header: IncrementHeader,
    reader: Option<BufReader<File>>,
    current: Option<RecordHeader>,
}

impl IncrementCursor {
    /// Open `path`, parse its header and position on the first record.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .io_context(|| format!("opening increment {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let mut line = Vec::new();
        reader
            .read_until(b'\n', &mut line)
            .await
            .io_context(|| format!("reading header of {}", path.display()))?;
        let header = IncrementHeader::decode(&line, path)?;

        let mut cursor = Self {
            path: path.to_path_buf(),
            header,
            reader: Some(reader),
            current: None,
        };
        cursor.advance().await?;
        Ok(cursor)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IncrementHeader {
        &self.header
    }

    pub fn block_size(&self) -> u64 {
        self.header.block_size()
    }

    /// Offset of the next undelivered record, `None` at EOF.
    pub fn peek_offset(&self) -> Option<u64> {
        self.current.map(|r| r.offset)
    }

    /// Read the current record's data (`len` bytes) and move to the next one.
    ///
    /// `len` is the block size, or the device tail for the final block.
    pub async fn take_record(&mut self, len: usize) -> Result<Option<(Vec<u8>, BlockHash)>> {
        let (Some(record), Some(reader)) = (self.current, self.reader.as_mut()) else {
            return Ok(None);
        };

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SyncError::parsing(
                    &self.path,
                    format!("record at offset {} is truncated", record.offset),
                )
            } else {
                SyncError::io(
                    format!("reading offset {} of {}", record.offset, self.path.display()),
                    e,
                )
            }
        })?;

        trace!(path = %self.path.display(), offset = record.offset, "took record");
        self.advance().await?;
        Ok(Some((data, record.hash)))
    }

    /// Seek past the current record's data without reading it.
    pub async fn skip_record(&mut self, len: usize) -> Result<()> {
        let (Some(record), Some(reader)) = (self.current, self.reader.as_mut()) else {
            return Ok(());
        };

        reader
            .seek(SeekFrom::Current(len as i64))
            .await
            .io_context(|| {
                format!(
                    "skipping offset {} of {}",
                    record.offset,
                    self.path.display()
                )
            })?;

        trace!(path = %self.path.display(), offset = record.offset, "skipped stale record");
        self.advance().await
    }

    /// Parse the next record header, or close the cursor at EOF.
    async fn advance(&mut self) -> Result<()> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };

        let mut raw = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < RECORD_HEADER_LEN {
            let n = reader
                .read(&mut raw[filled..])
                .await
                .io_context(|| format!("reading record header of {}", self.path.display()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.reader = None;
            self.current = None;
            return Ok(());
        }
        if filled < RECORD_HEADER_LEN {
            return Err(SyncError::parsing(
                &self.path,
                format!("truncated record header ({} of {} bytes)", filled, RECORD_HEADER_LEN),
            ));
        }

        let next = RecordHeader::decode(&raw);
        let block_size = self.block_size();
        if next.offset % block_size != 0 {
            return Err(SyncError::parsing(
                &self.path,
                format!(
                    "offset {} is not aligned to block size {}",
                    next.offset, block_size
                ),
            ));
        }
        if let Some(prev) = self.current {
            if next.offset <= prev.offset {
                return Err(SyncError::parsing(
                    &self.path,
                    format!(
                        "offset {} does not follow offset {}",
                        next.offset, prev.offset
                    ),
                ));
            }
        }

        self.current = Some(next);
        Ok(())
    }
}
