//! Restore a device image from a chain truncated at a chosen increment.

use crate::chain::{open_at, ChainReader};
use crate::error::{IoResultExt, Result, SyncError};
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreStats {
    pub blocks: u64,
    pub bytes: u64,
}

/// Write the whole logical content of `chain` to `out`.
pub async fn replay<W>(mut chain: ChainReader, out: &mut W) -> Result<RestoreStats>
where
    W: AsyncWrite + Unpin,
{
    let mut stats = RestoreStats::default();
    while let Some(block) = chain.next_block().await? {
        out.write_all(&block.data)
            .await
            .io_context(|| format!("writing restored block at offset {}", block.offset))?;
        stats.blocks += 1;
        stats.bytes += block.data.len() as u64;
    }
    out.flush().await.io_context(|| "flushing restored image")?;
    Ok(stats)
}

/// Restore the chain ending at `increment` (`<base>.iimgNNN`) into `out`.
pub async fn restore<W>(increment: &Path, out: &mut W) -> Result<RestoreStats>
where
    W: AsyncWrite + Unpin,
{
    let chain = open_at(increment).await?;
    replay(chain, out).await
}

/// Restore into `destination`, a file or block device.
///
/// An existing regular file is only overwritten with `force`.
pub async fn restore_to_path(increment: &Path, destination: &Path, force: bool) -> Result<RestoreStats> {
    // open the chain first so a bad chain never touches the destination
    let chain = open_at(increment).await?;

    let is_file = tokio::fs::metadata(destination)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if is_file && !force {
        return Err(SyncError::DestinationExists(destination.to_path_buf()));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(is_file)
        .open(destination)
        .await
        .io_context(|| format!("opening {}", destination.display()))?;

    let stats = replay(chain, &mut file).await?;
    file.sync_all()
        .await
        .io_context(|| format!("syncing {}", destination.display()))?;

    info!(
        increment = %increment.display(),
        destination = %destination.display(),
        blocks = stats.blocks,
        bytes = stats.bytes,
        "restored image"
    );
    Ok(stats)
}
