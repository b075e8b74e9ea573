//! Endpoint mode - runs when invoked as `iblocksync-remote <source|writer> <path>`
//!
//! The driver talks to us over stdin/stdout; logs go to stderr.

pub mod source;
pub mod writer;

pub use source::{source_identifier, SourceConfig, SourceStats, SourceStream};
pub use writer::{ChainWriter, ChainWriterConfig, WriterStats};

use crate::error::{Peer, Result};
use crate::transport::{Channel, EndpointRole};
use std::path::{Path, PathBuf};
use tracing::info;

/// Resolve a leading `~` component against the home directory.
///
/// `~user` forms and paths without a home directory pass through unchanged.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Endpoint entry point
pub async fn run_endpoint(role: EndpointRole, raw_path: &Path) -> Result<()> {
    let path = expand_tilde(raw_path);
    let mut channel = Channel::new(Peer::Driver, tokio::io::stdin(), tokio::io::stdout());

    match role {
        EndpointRole::Source => {
            let stream = SourceStream::new(SourceConfig {
                path,
                identify: true,
            });
            let stats = stream.run(&mut channel).await?;
            info!(
                blocks = stats.blocks,
                sent = stats.blocks_sent,
                "source endpoint done"
            );
        }
        EndpointRole::Writer => {
            let writer = ChainWriter::new(ChainWriterConfig { base: path });
            let stats = writer.run(&mut channel).await?;
            info!(
                blocks = stats.blocks,
                written = stats.blocks_written,
                increment = %stats.increment.display(),
                "writer endpoint done"
            );
        }
    }

    channel.shutdown().await
}
