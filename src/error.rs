use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Which party of a session an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// The sending endpoint reading the source device
    Source,
    /// The receiving endpoint appending to the chain
    Writer,
    /// The local orchestrator relaying between the two
    Driver,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Source => f.write_str("source"),
            Peer::Writer => f.write_str("chain writer"),
            Peer::Driver => f.write_str("driver"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("protocol version mismatch: {peer} speaks {remote}, local version is {local}")]
    VersionMismatch {
        peer: Peer,
        local: String,
        remote: String,
    },

    #[error("chain integrity error in {}: {reason}", path.display())]
    ChainIntegrity { path: PathBuf, reason: String },

    #[error("could not parse {}: {reason}", path.display())]
    RecordParsing { path: PathBuf, reason: String },

    #[error("{peer} died: {context}")]
    PeerDied { peer: Peer, context: String },

    #[error("malformed message from {peer}: {reason}")]
    Protocol { peer: Peer, reason: String },

    #[error("{peer} reported a fatal error: {message}")]
    RemoteFatal { peer: Peer, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("destination {} already exists (use --force to overwrite)", .0.display())]
    DestinationExists(PathBuf),
}

impl SyncError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SyncError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn chain(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::ChainIntegrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn parsing(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SyncError::RecordParsing {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Classify an I/O failure on a peer channel.
    ///
    /// A short read or a closed pipe means the process on the other end is
    /// gone; everything else stays a plain I/O error.
    pub fn channel(peer: Peer, context: impl Into<String>, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset => SyncError::PeerDied {
                peer,
                context: context.into(),
            },
            _ => SyncError::io(context, source),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Attach a context message to raw I/O results.
pub trait IoResultExt<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| SyncError::io(f(), e))
    }
}
