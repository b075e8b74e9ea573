//! In-process three-party sessions over loopback channels.
#![allow(dead_code)]

use iblocksync::config::{EndpointSpec, SyncConfig};
use iblocksync::server::{ChainWriter, ChainWriterConfig, SourceConfig, SourceStats, SourceStream, WriterStats};
use iblocksync::sync::{run_session, SessionReport};
use iblocksync::transport::loopback;
use iblocksync::{Peer, Result};
use std::path::{Path, PathBuf};

pub struct Outcome {
    pub report: Result<SessionReport>,
    pub source: Result<SourceStats>,
    pub writer: Result<WriterStats>,
}

pub fn config(source: &Path, base: &Path, block_size: u64) -> SyncConfig {
    let side = |path: &Path| EndpointSpec {
        host: "localhost".parse().unwrap(),
        path: path.to_path_buf(),
        identity_file: None,
        sudo: false,
    };
    let mut config = SyncConfig::new(side(source), side(base));
    config.block_size = block_size;
    config.comment = "test run".to_string();
    config.quiet = true;
    config
}

/// Run one full session with both endpoints as tasks of this process.
pub async fn sync_in_process(config: &SyncConfig) -> Outcome {
    let (mut to_source, mut source_end) = loopback(Peer::Driver, Peer::Source);
    let (mut to_writer, mut writer_end) = loopback(Peer::Driver, Peer::Writer);

    let source = SourceStream::new(SourceConfig {
        path: config.source.path.clone(),
        identify: false,
    });
    let writer = ChainWriter::new(ChainWriterConfig {
        base: config.destination.path.clone(),
    });

    let source_task = tokio::spawn(async move { source.run(&mut source_end).await });
    let writer_task = tokio::spawn(async move { writer.run(&mut writer_end).await });

    let report = run_session(config, &mut to_source, &mut to_writer).await;
    drop(to_source);
    drop(to_writer);

    Outcome {
        report,
        source: source_task.await.unwrap(),
        writer: writer_task.await.unwrap(),
    }
}

/// Create `dir/name` with `content`.
pub fn image(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
