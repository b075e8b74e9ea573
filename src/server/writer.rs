//! Chain writer endpoint.
//!
//! Replays the current chain content in offset order, offers each block's
//! hash and appends whatever the source sends back to a new increment.

use crate::chain::{next_increment, ChainReader, IncrementHeader, IncrementWriter};
use crate::config::MAX_BLOCK_SIZE;
use crate::error::{Result, SyncError};
use crate::hash::blocks_differ;
use crate::protocol::{WriterHello, WriterRequest};
use crate::transport::Channel;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Chain writer configuration
pub struct ChainWriterConfig {
    /// Base image of the chain
    pub base: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterStats {
    pub blocks: u64,
    pub blocks_written: u64,
    pub increment: PathBuf,
}

pub struct ChainWriter {
    config: ChainWriterConfig,
}

impl ChainWriter {
    pub fn new(config: ChainWriterConfig) -> Self {
        Self { config }
    }

    /// Serve one session over `channel`, producing one new increment.
    pub async fn run<R, W>(&self, channel: &mut Channel<R, W>) -> Result<WriterStats>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request: WriterRequest = channel.read_message().await?;

        let (mut chain, mut increment) = match self.prepare(&request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Err(send_err) = channel.send_fatal(e.to_string()).await {
                    warn!("could not report fatal error to the driver: {}", send_err);
                }
                return Err(e);
            }
        };

        let path = increment.path().to_path_buf();
        let blocks = match self.transfer(&mut chain, &mut increment, channel).await {
            Ok(blocks) => blocks,
            Err(e) => {
                if let Err(close_err) = increment.abandon().await {
                    warn!(path = %path.display(), "could not close increment: {}", close_err);
                }
                return Err(e);
            }
        };

        let blocks_written = increment.seal().await?;
        debug!(blocks, blocks_written, "chain writer finished");

        Ok(WriterStats {
            blocks,
            blocks_written,
            increment: path,
        })
    }

    /// Reply to the handshake and run the block loop. Returns the block count.
    async fn transfer<R, W>(
        &self,
        chain: &mut ChainReader,
        increment: &mut IncrementWriter,
        channel: &mut Channel<R, W>,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        channel.send_message(&WriterHello::new()).await?;

        info!(
            base = %self.config.base.display(),
            increment = %increment.path().display(),
            size = chain.size(),
            "writing increment"
        );

        let mut blocks = 0u64;
        while let Some(block) = chain.next_block().await? {
            channel.write_hash(&block.hash).await?;
            let peer_hash = channel.read_hash().await?;

            if blocks_differ(&block.hash, &peer_hash) {
                let data = channel.read_exact(block.data.len()).await?;
                increment.append(block.offset, &peer_hash, &data).await?;
            }
            blocks += 1;
        }
        Ok(blocks)
    }

    /// Open the chain and create the next increment.
    async fn prepare(&self, request: &WriterRequest) -> Result<(ChainReader, IncrementWriter)> {
        if request.block_size == 0 || request.block_size > MAX_BLOCK_SIZE {
            return Err(SyncError::Config(format!(
                "block size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, request.block_size
            )));
        }

        let base = &self.config.base;
        let (existing, next) = next_increment(base).await?;
        let chain = ChainReader::open(base, &existing, request.block_size).await?;

        if chain.size() != request.source_size {
            return Err(SyncError::chain(
                base,
                format!(
                    "base image is {} bytes but the source is {} bytes",
                    chain.size(),
                    request.source_size
                ),
            ));
        }

        let header = IncrementHeader::new(
            request.block_size,
            request.source_path.as_str(),
            request.source_id.as_str(),
            request.comment.as_str(),
            request.source_size,
        );
        let increment = IncrementWriter::create(&next, &header).await?;

        Ok((chain, increment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{increment_path, open_at};
    use crate::error::Peer;
    use crate::hash::BlockHash;
    use crate::transport::loopback;
    use tempfile::TempDir;

    fn request(size: u64) -> WriterRequest {
        WriterRequest {
            block_size: 4,
            source_path: "/dev/sdz".to_string(),
            source_id: "UUID=\"abc\"".to_string(),
            comment: "nightly".to_string(),
            source_size: size,
        }
    }

    #[tokio::test]
    async fn test_writes_changed_blocks_only() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("disk.img");
        std::fs::write(&base, b"AAAABBBBCCCC").unwrap();

        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Writer);
        let writer = ChainWriter::new(ChainWriterConfig { base: base.clone() });
        let task = tokio::spawn(async move { writer.run(&mut endpoint).await });

        driver.send_message(&request(12)).await.unwrap();
        let hello: WriterHello = driver.read_reply().await.unwrap();
        assert_eq!(hello, WriterHello::new());

        for (current, incoming) in [(b"AAAA", b"AAAA"), (b"BBBB", b"XXXX"), (b"CCCC", b"CCCC")] {
            assert_eq!(driver.read_hash().await.unwrap(), BlockHash::of(current));
            driver.write_hash(&BlockHash::of(incoming)).await.unwrap();
            if current != incoming {
                driver.write_all(incoming).await.unwrap();
            }
        }

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.blocks_written, 1);
        assert_eq!(stats.increment, increment_path(&base, 0));

        let mut chain = open_at(&stats.increment).await.unwrap();
        let mut content = Vec::new();
        while let Some(block) = chain.next_block().await.unwrap() {
            content.extend(block.data);
        }
        assert_eq!(content, b"AAAAXXXXCCCC");
    }

    #[tokio::test]
    async fn test_size_mismatch_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("disk.img");
        std::fs::write(&base, b"AAAA").unwrap();

        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Writer);
        let writer = ChainWriter::new(ChainWriterConfig { base: base.clone() });
        let task = tokio::spawn(async move { writer.run(&mut endpoint).await });

        driver.send_message(&request(8)).await.unwrap();
        let err = driver.read_reply::<WriterHello>().await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteFatal { .. }));
        assert!(matches!(
            task.await.unwrap(),
            Err(SyncError::ChainIntegrity { .. })
        ));
        assert!(!increment_path(&base, 0).exists());
    }

    #[tokio::test]
    async fn test_missing_base_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Writer);
        let writer = ChainWriter::new(ChainWriterConfig {
            base: tmp.path().join("nothing.img"),
        });
        let task = tokio::spawn(async move { writer.run(&mut endpoint).await });

        driver.send_message(&request(4)).await.unwrap();
        assert!(driver.read_reply::<WriterHello>().await.is_err());
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_oversized_block_size_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("disk.img");
        std::fs::write(&base, b"AAAA").unwrap();

        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Writer);
        let writer = ChainWriter::new(ChainWriterConfig { base: base.clone() });
        let task = tokio::spawn(async move { writer.run(&mut endpoint).await });

        let mut oversized = request(4);
        oversized.block_size = u64::MAX;
        driver.send_message(&oversized).await.unwrap();
        assert!(matches!(
            driver.read_reply::<WriterHello>().await,
            Err(SyncError::RemoteFatal { .. })
        ));
        assert!(matches!(task.await.unwrap(), Err(SyncError::Config(_))));
        assert!(!increment_path(&base, 0).exists());
    }

    #[tokio::test]
    async fn test_aborted_session_leaves_usable_increment() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("disk.img");
        std::fs::write(&base, b"AAAABBBB").unwrap();

        let (mut driver, mut endpoint) = loopback(Peer::Driver, Peer::Writer);
        let writer = ChainWriter::new(ChainWriterConfig { base: base.clone() });
        let task = tokio::spawn(async move { writer.run(&mut endpoint).await });

        driver.send_message(&request(8)).await.unwrap();
        let _: WriterHello = driver.read_reply().await.unwrap();
        drop(driver);

        assert!(matches!(
            task.await.unwrap(),
            Err(SyncError::PeerDied {
                peer: Peer::Driver,
                ..
            })
        ));

        // header-only increment: the chain still reads as the base image
        let mut chain = open_at(&increment_path(&base, 0)).await.unwrap();
        let mut content = Vec::new();
        while let Some(block) = chain.next_block().await.unwrap() {
            content.extend(block.data);
        }
        assert_eq!(content, b"AAAABBBB");
    }
}
