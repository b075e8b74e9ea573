//! Per-block relay between the source and the chain writer.

use crate::error::Result;
use crate::hash::blocks_differ;
use crate::sync::progress::ProgressMeter;
use crate::transport::Channel;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

/// Outcome of one block loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub same_blocks: u64,
    pub diff_blocks: u64,
    pub bytes_transferred: u64,
    pub duration: Duration,
}

pub struct SyncDriver {
    block_size: u64,
    pause: Option<Duration>,
}

impl SyncDriver {
    pub fn new(block_size: u64, pause: Option<Duration>) -> Self {
        Self { block_size, pause }
    }

    /// Run the lock-step block loop over `total_size` bytes.
    ///
    /// Both endpoints must already have completed their handshakes.
    pub async fn run<SR, SW, WR, WW>(
        &self,
        source: &mut Channel<SR, SW>,
        writer: &mut Channel<WR, WW>,
        total_size: u64,
        progress: &mut ProgressMeter,
    ) -> Result<SyncStats>
    where
        SR: AsyncRead + Unpin,
        SW: AsyncWrite + Unpin,
        WR: AsyncRead + Unpin,
        WW: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let mut stats = SyncStats::default();
        let mut offset = 0u64;

        while offset < total_size {
            let len = (total_size - offset).min(self.block_size);

            let destination_hash = writer.read_hash().await?;
            let source_hash = source.read_hash().await?;

            if let Some(pause) = self.pause {
                tokio::time::sleep(pause).await;
            }

            // each side decides from the other side's hash
            writer.write_hash(&source_hash).await?;
            source.write_hash(&destination_hash).await?;

            if blocks_differ(&source_hash, &destination_hash) {
                trace!(offset, len, "relaying block");
                let block = source.read_exact(len as usize).await?;
                writer.write_all(&block).await?;
                stats.diff_blocks += 1;
                stats.bytes_transferred += len;
            } else {
                stats.same_blocks += 1;
            }

            offset += len;
            progress.update(offset, stats.same_blocks, stats.diff_blocks);
        }

        progress.finish();
        stats.duration = started.elapsed();
        Ok(stats)
    }
}
