//! Session protocol.
//!
//! Each endpoint first exchanges one JSON line per direction with the driver
//! (the handshake), then the block loop runs over a flat stream of raw
//! 20-byte hashes and raw block payloads:
//!
//! ```text
//! driver -> source : {"block_size":N}
//! source -> driver : {"identifier":..,"size":..,"version":..}
//! driver -> writer : {"block_size":N,"source_path":..,"source_id":..,"comment":..,"source_size":..}
//! writer -> driver : {"version":..}
//!
//! per block, in offset order:
//!   writer -> driver : hash[20]           source -> driver : hash[20]
//!   driver -> writer : source hash[20]    driver -> source : writer hash[20]
//!   if the hashes differ:
//!     source -> driver -> writer : block bytes (block_size or tail)
//! ```
//!
//! An endpoint that fails before its reply answers `{"fatal":"..."}` instead.

use crate::error::{Peer, Result, SyncError};
use serde::{Deserialize, Serialize};

/// Version spoken by every program of this crate; peers must match exactly
pub const PROTOCOL_VERSION: &str = "1.0";

/// Longest accepted handshake line
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024;

/// Driver -> source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub block_size: u64,
}

/// Source -> driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHello {
    pub identifier: String,
    pub size: u64,
    pub version: String,
}

/// Driver -> writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterRequest {
    pub block_size: u64,
    pub source_path: String,
    pub source_id: String,
    pub comment: String,
    pub source_size: u64,
}

/// Writer -> driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterHello {
    pub version: String,
}

impl WriterHello {
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

impl Default for WriterHello {
    fn default() -> Self {
        Self::new()
    }
}

/// Sent in place of a handshake reply when the endpoint cannot continue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fatal {
    pub fatal: String,
}

/// A handshake reply as read by the driver
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Fatal(Fatal),
    Ok(T),
}

impl<T> Reply<T> {
    pub fn into_result(self, peer: Peer) -> Result<T> {
        match self {
            Reply::Ok(msg) => Ok(msg),
            Reply::Fatal(fatal) => Err(SyncError::RemoteFatal {
                peer,
                message: fatal.fatal,
            }),
        }
    }
}

/// Fail unless `remote` equals our own protocol version.
pub fn check_version(peer: Peer, remote: &str) -> Result<()> {
    if remote == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(SyncError::VersionMismatch {
            peer,
            local: PROTOCOL_VERSION.to_string(),
            remote: remote.to_string(),
        })
    }
}
