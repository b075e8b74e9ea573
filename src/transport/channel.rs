//! Duplex byte channel to one peer.
//!
//! The driver and both endpoints only ever need `read_exact` and `write_all`
//! (plus line-framed JSON for the handshake), so any reader/writer pair can
//! back a channel: a child process' stdout/stdin, our own stdin/stdout, or an
//! in-process loopback pipe.

use crate::error::{Peer, Result, SyncError};
use crate::hash::{BlockHash, HASH_LEN};
use crate::protocol::{Fatal, Reply, MAX_MESSAGE_LEN};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream,
    ReadHalf, WriteHalf,
};

/// Pipe buffer for loopback channels
const LOOPBACK_BUFFER: usize = 64 * 1024;

pub struct Channel<R, W> {
    peer: Peer,
    reader: BufReader<R>,
    writer: W,
}

/// In-process channel end
pub type LoopbackChannel = Channel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Connect two in-process parties.
///
/// The first channel is held by `near` and talks to `far`; the second is
/// held by `far`.
pub fn loopback(near: Peer, far: Peer) -> (LoopbackChannel, LoopbackChannel) {
    let (a, b) = tokio::io::duplex(LOOPBACK_BUFFER);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    (
        Channel::new(far, a_read, a_write),
        Channel::new(near, b_read, b_write),
    )
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `peer` names the party at the other end, for error reporting.
    pub fn new(peer: Peer, reader: R, writer: W) -> Self {
        Self {
            peer,
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Read exactly `len` bytes; a short read means the peer is gone.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| SyncError::channel(self.peer, format!("reading {} bytes", len), e))?;
        Ok(buf)
    }

    /// Write all bytes and flush.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let peer = self.peer;
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| SyncError::channel(peer, format!("writing {} bytes", bytes.len()), e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SyncError::channel(peer, "flushing", e))
    }

    pub async fn read_hash(&mut self) -> Result<BlockHash> {
        let mut raw = [0u8; HASH_LEN];
        self.reader
            .read_exact(&mut raw)
            .await
            .map_err(|e| SyncError::channel(self.peer, "reading block hash", e))?;
        Ok(BlockHash::from_bytes(raw))
    }

    pub async fn write_hash(&mut self, hash: &BlockHash) -> Result<()> {
        self.write_all(hash.as_bytes()).await
    }

    /// Send one newline-terminated JSON message.
    pub async fn send_message<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let mut line = serde_json::to_vec(msg).map_err(|e| SyncError::Protocol {
            peer: self.peer,
            reason: format!("could not encode message: {}", e),
        })?;
        line.push(b'\n');
        self.write_all(&line).await
    }

    /// Read one newline-terminated JSON message.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut line = Vec::new();
        let n = (&mut self.reader)
            .take(MAX_MESSAGE_LEN)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| SyncError::channel(self.peer, "reading handshake", e))?;

        if n == 0 {
            return Err(SyncError::PeerDied {
                peer: self.peer,
                context: "closed the channel before the handshake".to_string(),
            });
        }
        if line.last() != Some(&b'\n') {
            return Err(SyncError::Protocol {
                peer: self.peer,
                reason: format!("handshake line is truncated or longer than {} bytes", MAX_MESSAGE_LEN),
            });
        }

        serde_json::from_slice(&line).map_err(|e| SyncError::Protocol {
            peer: self.peer,
            reason: format!("invalid handshake: {}", e),
        })
    }

    /// Read a handshake reply, turning a `{"fatal":..}` line into an error.
    pub async fn read_reply<T: DeserializeOwned>(&mut self) -> Result<T> {
        let reply: Reply<T> = self.read_message().await?;
        reply.into_result(self.peer)
    }

    pub async fn send_fatal(&mut self, message: impl Into<String>) -> Result<()> {
        self.send_message(&Fatal {
            fatal: message.into(),
        })
        .await
    }

    /// Close our sending half so the peer sees EOF.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| SyncError::channel(self.peer, "closing channel", e))
    }
}
