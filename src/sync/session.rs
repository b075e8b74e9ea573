//! One sync session: endpoint handshakes, the block loop and shutdown.

use crate::config::SyncConfig;
use crate::error::{Peer, Result};
use crate::protocol::{check_version, SourceHello, SourceRequest, WriterHello, WriterRequest};
use crate::sync::driver::{SyncDriver, SyncStats};
use crate::sync::progress::ProgressMeter;
use crate::transport::{Channel, EndpointRole, EndpointSession};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub source: SourceHello,
    pub stats: SyncStats,
}

/// Ask the source for its identifier and size.
pub async fn source_handshake<R, W>(
    source: &mut Channel<R, W>,
    block_size: u64,
) -> Result<SourceHello>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    source.send_message(&SourceRequest { block_size }).await?;
    let hello: SourceHello = source.read_reply().await?;
    check_version(Peer::Source, &hello.version)?;
    Ok(hello)
}

/// Have the writer open its chain and create the next increment.
pub async fn writer_handshake<R, W>(
    writer: &mut Channel<R, W>,
    request: &WriterRequest,
) -> Result<WriterHello>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.send_message(request).await?;
    let hello: WriterHello = writer.read_reply().await?;
    check_version(Peer::Writer, &hello.version)?;
    Ok(hello)
}

fn writer_request(config: &SyncConfig, source: &SourceHello) -> WriterRequest {
    WriterRequest {
        block_size: config.block_size,
        source_path: config.source.path.to_string_lossy().into_owned(),
        source_id: source.identifier.clone(),
        comment: config.comment.clone(),
        source_size: source.size,
    }
}

fn announce(config: &SyncConfig) {
    info!(
        "block size is {:.1} MiB",
        config.block_size as f64 / (1024.0 * 1024.0)
    );
    if let Some(pause) = config.pause {
        info!("slowing down for {} ms/block", pause.as_millis());
    }
}

/// Run a session over already connected endpoint channels.
pub async fn run_session<SR, SW, WR, WW>(
    config: &SyncConfig,
    source: &mut Channel<SR, SW>,
    writer: &mut Channel<WR, WW>,
) -> Result<SessionReport>
where
    SR: AsyncRead + Unpin,
    SW: AsyncWrite + Unpin,
    WR: AsyncRead + Unpin,
    WW: AsyncWrite + Unpin,
{
    config.validate()?;
    announce(config);

    let hello = source_handshake(source, config.block_size).await?;
    writer_handshake(writer, &writer_request(config, &hello)).await?;

    let stats = drive(config, &hello, source, writer).await?;
    Ok(SessionReport {
        source: hello,
        stats,
    })
}

async fn drive<SR, SW, WR, WW>(
    config: &SyncConfig,
    hello: &SourceHello,
    source: &mut Channel<SR, SW>,
    writer: &mut Channel<WR, WW>,
) -> Result<SyncStats>
where
    SR: AsyncRead + Unpin,
    SW: AsyncWrite + Unpin,
    WR: AsyncRead + Unpin,
    WW: AsyncWrite + Unpin,
{
    info!(size = hello.size, identifier = %hello.identifier, "starting sync");
    let mut progress = ProgressMeter::new(hello.size, config.quiet);
    let stats = SyncDriver::new(config.block_size, config.pause)
        .run(source, writer, hello.size, &mut progress)
        .await?;
    info!(
        same = stats.same_blocks,
        diff = stats.diff_blocks,
        "completed in {} seconds",
        stats.duration.as_secs()
    );
    Ok(stats)
}

/// Start both endpoints, run the session and wait for them to exit.
///
/// The writer is only started once the source has answered, since its
/// request carries the source's identifier and size.
pub async fn sync_chain(config: &SyncConfig) -> Result<SessionReport> {
    config.validate()?;
    announce(config);

    let mut source =
        EndpointSession::spawn(&config.source, EndpointRole::Source, &config.remote_command)
            .await?;
    let hello = source_handshake(source.channel(), config.block_size).await?;

    let mut writer = EndpointSession::spawn(
        &config.destination,
        EndpointRole::Writer,
        &config.remote_command,
    )
    .await?;
    writer_handshake(writer.channel(), &writer_request(config, &hello)).await?;

    let stats = drive(config, &hello, source.channel(), writer.channel()).await?;

    source.finish().await?;
    writer.finish().await?;

    Ok(SessionReport {
        source: hello,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::Fatal;
    use crate::transport::loopback;

    #[tokio::test]
    async fn test_source_version_mismatch() {
        let (mut driver, mut source) = loopback(Peer::Driver, Peer::Source);
        let task = tokio::spawn(async move {
            let _: SourceRequest = source.read_message().await.unwrap();
            source
                .send_message(&SourceHello {
                    identifier: String::new(),
                    size: 4,
                    version: "0.9".to_string(),
                })
                .await
                .unwrap();
        });

        let err = source_handshake(&mut driver, 4).await.unwrap_err();
        task.await.unwrap();
        match err {
            SyncError::VersionMismatch { peer, remote, .. } => {
                assert_eq!(peer, Peer::Source);
                assert_eq!(remote, "0.9");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_writer_fatal_reply() {
        let (mut driver, mut writer) = loopback(Peer::Driver, Peer::Writer);
        let task = tokio::spawn(async move {
            let request: WriterRequest = writer.read_message().await.unwrap();
            assert_eq!(request.comment, "weekly");
            writer
                .send_message(&Fatal {
                    fatal: "can not make more than 1000 incremental images".to_string(),
                })
                .await
                .unwrap();
        });

        let request = WriterRequest {
            block_size: 4,
            source_path: "/dev/sda".to_string(),
            source_id: String::new(),
            comment: "weekly".to_string(),
            source_size: 8,
        };
        let err = writer_handshake(&mut driver, &request).await.unwrap_err();
        task.await.unwrap();
        assert!(matches!(
            err,
            SyncError::RemoteFatal {
                peer: Peer::Writer,
                ..
            }
        ));
    }
}
