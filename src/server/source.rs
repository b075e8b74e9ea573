//! Source stream endpoint.
//!
//! Reads the source device block by block, offers each block's hash and
//! sends the block itself only when the chain writer's hash differs.

use crate::config::MAX_BLOCK_SIZE;
use crate::error::{IoResultExt, Result, SyncError};
use crate::hash::{blocks_differ, BlockHash};
use crate::protocol::{SourceHello, SourceRequest, PROTOCOL_VERSION};
use crate::transport::Channel;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Source stream configuration
pub struct SourceConfig {
    /// Device or file to read
    pub path: PathBuf,
    /// Look up a filesystem identifier with `blkid`
    pub identify: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub blocks: u64,
    pub blocks_sent: u64,
    pub bytes_read: u64,
}

pub struct SourceStream {
    config: SourceConfig,
}

/// Best-effort filesystem identifier of `path`, empty if unavailable.
pub async fn source_identifier(path: &Path) -> String {
    let output = Command::new("blkid")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        Ok(out) => {
            debug!(path = %path.display(), status = %out.status, "blkid found no identifier");
            String::new()
        }
        Err(e) => {
            warn!(path = %path.display(), "could not run blkid: {}", e);
            String::new()
        }
    }
}

/// Open a device or file and measure it by seeking to its end.
async fn open_sized(path: &Path) -> Result<(File, u64)> {
    let mut file = File::open(path)
        .await
        .io_context(|| format!("opening source {}", path.display()))?;
    let size = file
        .seek(SeekFrom::End(0))
        .await
        .io_context(|| format!("sizing source {}", path.display()))?;
    file.seek(SeekFrom::Start(0))
        .await
        .io_context(|| format!("rewinding source {}", path.display()))?;
    Ok((file, size))
}

impl SourceStream {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    /// Serve one session over `channel`.
    pub async fn run<R, W>(&self, channel: &mut Channel<R, W>) -> Result<SourceStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request: SourceRequest = channel.read_message().await?;
        let block_size = request.block_size;

        let (mut file, size) = match self.open(block_size).await {
            Ok(opened) => opened,
            Err(e) => {
                // the driver is still waiting for our reply
                if let Err(send_err) = channel.send_fatal(e.to_string()).await {
                    warn!("could not report fatal error to the driver: {}", send_err);
                }
                return Err(e);
            }
        };

        let identifier = if self.config.identify {
            source_identifier(&self.config.path).await
        } else {
            String::new()
        };

        channel
            .send_message(&SourceHello {
                identifier,
                size,
                version: PROTOCOL_VERSION.to_string(),
            })
            .await?;

        info!(
            path = %self.config.path.display(),
            size,
            block_size,
            "streaming source"
        );

        let mut stats = SourceStats::default();
        let mut buf = vec![0u8; block_size.min(size) as usize];
        let mut offset = 0u64;

        while offset < size {
            let len = (size - offset).min(block_size) as usize;
            let block = &mut buf[..len];
            file.read_exact(block).await.io_context(|| {
                format!(
                    "reading offset {} of {}",
                    offset,
                    self.config.path.display()
                )
            })?;

            let hash = BlockHash::of(block);
            channel.write_hash(&hash).await?;
            let peer_hash = channel.read_hash().await?;

            if blocks_differ(&hash, &peer_hash) {
                channel.write_all(block).await?;
                stats.blocks_sent += 1;
            }

            stats.blocks += 1;
            stats.bytes_read += len as u64;
            offset += len as u64;
        }

        debug!(?stats, "source stream finished");
        Ok(stats)
    }

    async fn open(&self, block_size: u64) -> Result<(File, u64)> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(SyncError::Config(format!(
                "block size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, block_size
            )));
        }
        open_sized(&self.config.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Peer;
    use crate::transport::loopback;
    use tempfile::TempDir;

    fn stream(path: PathBuf) -> SourceStream {
        SourceStream::new(SourceConfig {
            path,
            identify: false,
        })
    }

    #[tokio::test]
    async fn test_sends_only_differing_blocks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("src.img");
        std::fs::write(&path, b"AAAABBBBCC").unwrap();

        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Source);
        let source = stream(path);
        let task = tokio::spawn(async move { source.run(&mut endpoint).await });

        driver
            .send_message(&SourceRequest { block_size: 4 })
            .await
            .unwrap();
        let hello: SourceHello = driver.read_reply().await.unwrap();
        assert_eq!(hello.size, 10);
        assert_eq!(hello.version, PROTOCOL_VERSION);
        assert!(hello.identifier.is_empty());

        // block 0 matches
        assert_eq!(driver.read_hash().await.unwrap(), BlockHash::of(b"AAAA"));
        driver.write_hash(&BlockHash::of(b"AAAA")).await.unwrap();

        // block 1 differs -> payload follows
        assert_eq!(driver.read_hash().await.unwrap(), BlockHash::of(b"BBBB"));
        driver.write_hash(&BlockHash::of(b"XXXX")).await.unwrap();
        assert_eq!(driver.read_exact(4).await.unwrap(), b"BBBB");

        // short tail differs
        assert_eq!(driver.read_hash().await.unwrap(), BlockHash::of(b"CC"));
        driver.write_hash(&BlockHash::of(b"")).await.unwrap();
        assert_eq!(driver.read_exact(2).await.unwrap(), b"CC");

        let stats = task.await.unwrap().unwrap();
        assert_eq!(
            stats,
            SourceStats {
                blocks: 3,
                blocks_sent: 2,
                bytes_read: 10
            }
        );
    }

    #[tokio::test]
    async fn test_missing_source_replies_fatal() {
        let tmp = TempDir::new().unwrap();
        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Source);
        let source = stream(tmp.path().join("missing"));
        let task = tokio::spawn(async move { source.run(&mut endpoint).await });

        driver
            .send_message(&SourceRequest { block_size: 4 })
            .await
            .unwrap();
        let err = driver.read_reply::<SourceHello>().await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteFatal { .. }));
        assert!(matches!(task.await.unwrap(), Err(SyncError::Io { .. })));
    }

    #[tokio::test]
    async fn test_driver_death_is_peer_died() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("src.img");
        std::fs::write(&path, b"AAAABBBB").unwrap();

        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Source);
        let source = stream(path);
        let task = tokio::spawn(async move { source.run(&mut endpoint).await });

        driver
            .send_message(&SourceRequest { block_size: 4 })
            .await
            .unwrap();
        let _: SourceHello = driver.read_reply().await.unwrap();
        driver.read_hash().await.unwrap();
        drop(driver);

        assert!(matches!(
            task.await.unwrap(),
            Err(SyncError::PeerDied {
                peer: Peer::Driver,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_open_error_survives_lost_fatal_reply() {
        let tmp = TempDir::new().unwrap();
        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Source);

        driver
            .send_message(&SourceRequest { block_size: 4 })
            .await
            .unwrap();
        drop(driver);

        // the fatal reply cannot be delivered; the open error is still returned
        let source = stream(tmp.path().join("missing"));
        assert!(matches!(
            source.run(&mut endpoint).await,
            Err(SyncError::Io { .. })
        ));
    }
}
