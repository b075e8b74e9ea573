//! Increment file codec.
//!
//! An increment file is one JSON header line followed by raw records:
//!
//! ```text
//! {"block_size":1048576,...}\n
//! offset:u64 (LE) | hash:[u8; 20] | data:[u8; block_size or tail]
//! offset:u64 (LE) | hash:[u8; 20] | data:[u8; block_size or tail]
//! ...
//! ```
//!
//! Records carry no length field. Readers derive the data length from the
//! header's `block_size` and the device length.

use crate::error::{Result, SyncError};
use crate::hash::{BlockHash, HASH_LEN};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version written into every new increment header
pub const FORMAT_VERSION: &str = "1.0";

/// Human readable layout, stored in the header for operators
pub const FORMAT_DESCRIPTION: &str = "<this JSON header> \\n [ <8 byte block offset (unsigned long long little-endian)> <20 bytes block SHA-1 hash> <block_size bytes block of data> ]...";

/// Size of the offset + hash prefix of each record
pub const RECORD_HEADER_LEN: usize = 8 + HASH_LEN;

/// Longest header excerpt quoted in a parse error
const HEADER_EXCERPT_LEN: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementHeader {
    pub block_size: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub source_size: u64,
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub file_format: String,
}

impl IncrementHeader {
    pub fn new(
        block_size: u64,
        source_path: impl Into<String>,
        source_id: impl Into<String>,
        comment: impl Into<String>,
        source_size: u64,
    ) -> Self {
        Self {
            block_size: block_size as i64,
            created_at: chrono::Local::now().to_rfc3339(),
            source_path: source_path.into(),
            source_id: source_id.into(),
            comment: comment.into(),
            source_size,
            format_version: FORMAT_VERSION.to_string(),
            file_format: FORMAT_DESCRIPTION.to_string(),
        }
    }

    /// Block size as validated by `decode`
    pub fn block_size(&self) -> u64 {
        self.block_size.max(0) as u64
    }

    /// Encode as a single newline-terminated line.
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a struct of strings and integers cannot fail
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        line
    }

    /// Decode the header line of `path`.
    pub fn decode(line: &[u8], path: &Path) -> Result<Self> {
        let text = line.strip_suffix(b"\n").ok_or_else(|| {
            SyncError::parsing(
                path,
                format!(
                    "header ({}) is not newline terminated",
                    sanitize(line, HEADER_EXCERPT_LEN)
                ),
            )
        })?;

        let header: IncrementHeader = serde_json::from_slice(text).map_err(|e| {
            SyncError::parsing(
                path,
                format!(
                    "could not parse header ({}): {}",
                    sanitize(text, HEADER_EXCERPT_LEN),
                    e
                ),
            )
        })?;

        if header.block_size <= 0 {
            return Err(SyncError::parsing(
                path,
                format!("non-positive block size {}", header.block_size),
            ));
        }

        Ok(header)
    }
}

/// The fixed prefix of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub offset: u64,
    pub hash: BlockHash,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = BytesMut::with_capacity(RECORD_HEADER_LEN);
        buf.put_u64_le(self.offset);
        buf.put_slice(self.hash.as_bytes());

        let mut out = [0u8; RECORD_HEADER_LEN];
        out.copy_from_slice(&buf);
        out
    }

    pub fn decode(raw: &[u8; RECORD_HEADER_LEN]) -> Self {
        let mut buf = &raw[..];
        let offset = buf.get_u64_le();
        let mut hash = [0u8; HASH_LEN];
        buf.copy_to_slice(&mut hash);
        Self {
            offset,
            hash: BlockHash::from_bytes(hash),
        }
    }
}

/// Keep printable ASCII only and cut to `max_len` characters (with `...`).
pub fn sanitize(raw: &[u8], max_len: usize) -> String {
    let printable: String = raw
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|&b| b as char)
        .collect();

    let max_len = max_len.max(3);
    if printable.len() <= max_len {
        printable
    } else {
        format!("{}...", &printable[..max_len - 3])
    }
}
