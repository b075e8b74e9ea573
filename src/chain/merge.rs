//! Merge read of a chain: base image overlaid with increments, latest wins.

use crate::chain::cursor::IncrementCursor;
use crate::error::{IoResultExt, Result, SyncError};
use crate::hash::BlockHash;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, trace};

/// One logical block of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub offset: u64,
    pub data: Vec<u8>,
    pub hash: BlockHash,
}

/// Yields the current content of a chain block by block, in offset order.
///
/// Only forward reads are used and at most one record per increment is in
/// flight. The base image alone determines the device length.
pub struct ChainReader {
    base_path: PathBuf,
    base: BufReader<File>,
    base_len: u64,
    block_size: u64,
    // newest increment first
    cursors: Vec<IncrementCursor>,
    offset: u64,
}

impl ChainReader {
    /// Open `base` and the given increments, which must be in creation order.
    pub async fn open(base: &Path, increments: &[PathBuf], block_size: u64) -> Result<Self> {
        if block_size == 0 {
            return Err(SyncError::Config("block size must be positive".to_string()));
        }

        let mut cursors = Vec::with_capacity(increments.len());
        for path in increments {
            let cursor = IncrementCursor::open(path).await?;
            if cursor.block_size() != block_size {
                return Err(SyncError::chain(
                    path,
                    format!(
                        "block size ({}) does not match expected ({})",
                        cursor.block_size(),
                        block_size
                    ),
                ));
            }
            cursors.push(cursor);
        }
        cursors.reverse();

        let mut file = File::open(base)
            .await
            .io_context(|| format!("opening base image {}", base.display()))?;
        // seek to the end rather than stat: block devices report a zero length
        let base_len = file
            .seek(SeekFrom::End(0))
            .await
            .io_context(|| format!("sizing base image {}", base.display()))?;
        file.seek(SeekFrom::Start(0))
            .await
            .io_context(|| format!("rewinding base image {}", base.display()))?;

        debug!(
            base = %base.display(),
            increments = cursors.len(),
            size = base_len,
            block_size,
            "opened chain"
        );

        Ok(Self {
            base_path: base.to_path_buf(),
            base: BufReader::new(file),
            base_len,
            block_size,
            cursors,
            offset: 0,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Device length in bytes, as given by the base image
    pub fn size(&self) -> u64 {
        self.base_len
    }

    pub fn increments(&self) -> usize {
        self.cursors.len()
    }

    /// Produce the logical block at the next offset, `None` past the end.
    pub async fn next_block(&mut self) -> Result<Option<Block>> {
        let offset = self.offset;
        if offset >= self.base_len {
            return Ok(None);
        }
        let len = (self.base_len - offset).min(self.block_size) as usize;

        let mut winner = None;
        for cursor in &mut self.cursors {
            if cursor.peek_offset() != Some(offset) {
                continue;
            }
            if winner.is_none() {
                trace!(offset, path = %cursor.path().display(), "block from increment");
                winner = cursor.take_record(len).await?;
            } else {
                // superseded by a newer increment
                cursor.skip_record(len).await?;
            }
        }

        let block = match winner {
            Some((data, hash)) => {
                // keep the base image in lockstep
                self.base
                    .seek(SeekFrom::Current(len as i64))
                    .await
                    .io_context(|| {
                        format!("seeking offset {} of {}", offset, self.base_path.display())
                    })?;
                Block { offset, data, hash }
            }
            None => {
                trace!(offset, "block from base image");
                let mut data = vec![0u8; len];
                self.base.read_exact(&mut data).await.io_context(|| {
                    format!("reading offset {} of {}", offset, self.base_path.display())
                })?;
                let hash = BlockHash::of(&data);
                Block { offset, data, hash }
            }
        };

        self.offset += self.block_size;
        Ok(Some(block))
    }
}
