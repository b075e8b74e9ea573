//! Session configuration.
//!
//! Everything a sync session needs is carried in [`SyncConfig`] and handed to
//! the session explicitly.

use crate::error::{Result, SyncError};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default block size (1 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Largest block size an increment header can record
pub const MAX_BLOCK_SIZE: u64 = i64::MAX as u64;

/// Program started on each endpoint host
pub const DEFAULT_REMOTE_COMMAND: &str = "iblocksync-remote";

/// Host name that runs an endpoint without ssh
pub const LOCALHOST: &str = "localhost";

/// `[user@]host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub user: Option<String>,
    pub host: String,
}

impl RemoteHost {
    pub fn is_local(&self) -> bool {
        self.host == LOCALHOST
    }
}

impl FromStr for RemoteHost {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (user, host) = match s.split_once('@') {
            Some((user, host)) => (Some(user), host),
            None => (None, s),
        };
        if host.is_empty() || host.contains('@') {
            return Err(SyncError::Config(format!("invalid host `{}'", s)));
        }
        if user.is_some_and(str::is_empty) {
            return Err(SyncError::Config(format!("empty user name in `{}'", s)));
        }
        Ok(Self {
            user: user.map(str::to_string),
            host: host.to_string(),
        })
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.host),
            None => f.write_str(&self.host),
        }
    }
}

/// One side of a session: where to run and which device or image to use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub host: RemoteHost,
    /// Source device, or base image of the destination chain
    pub path: PathBuf,
    /// ssh private key for this host
    pub identity_file: Option<PathBuf>,
    /// Run the endpoint under sudo
    pub sudo: bool,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source: EndpointSpec,
    pub destination: EndpointSpec,
    pub block_size: u64,
    /// Stored in the new increment's header
    pub comment: String,
    /// Fixed delay per block
    pub pause: Option<Duration>,
    pub remote_command: String,
    /// No progress display
    pub quiet: bool,
}

impl SyncConfig {
    pub fn new(source: EndpointSpec, destination: EndpointSpec) -> Self {
        Self {
            source,
            destination,
            block_size: DEFAULT_BLOCK_SIZE,
            comment: String::new(),
            pause: None,
            remote_command: DEFAULT_REMOTE_COMMAND.to_string(),
            quiet: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(SyncError::Config(format!(
                "block size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.remote_command.trim().is_empty() {
            return Err(SyncError::Config("remote command must not be empty".to_string()));
        }
        Ok(())
    }
}
