//! Block digests.
//!
//! Every party of a session hashes blocks with SHA-1 and exchanges the raw
//! 20-byte digests. The wire carries no length prefix, so `HASH_LEN` must stay
//! in sync with the digest function.

use sha1::{Digest, Sha1};
use std::fmt;

/// Length of a block digest in bytes
pub const HASH_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash([u8; HASH_LEN]);

impl BlockHash {
    /// Hash exactly the given bytes (a truncated final block is hashed at its
    /// real length).
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The transfer verdict shared by source, writer and driver.
///
/// All three parties call this with the same two digests and must agree, so
/// the comparison is over the full 20 bytes and nothing else.
pub fn blocks_differ(a: &BlockHash, b: &BlockHash) -> bool {
    a.as_bytes() != b.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha1("abc")
        assert_eq!(
            BlockHash::of(b"abc").to_hex(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_empty_digest_has_hash_len() {
        assert_eq!(BlockHash::of(b"").as_bytes().len(), HASH_LEN);
    }

    #[test]
    fn test_blocks_differ() {
        let a = BlockHash::of(b"AAAA");
        let b = BlockHash::of(b"BBBB");
        assert!(blocks_differ(&a, &b));
        assert!(!blocks_differ(&a, &BlockHash::of(b"AAAA")));
    }

    #[test]
    fn test_truncated_block_hashes_real_length() {
        // A short tail must not be padded before hashing
        assert_ne!(BlockHash::of(b"CC"), BlockHash::of(b"CC\0\0"));
    }

    #[test]
    fn test_single_byte_difference_is_detected() {
        let mut bytes = *BlockHash::of(b"block").as_bytes();
        let original = BlockHash::from_bytes(bytes);
        bytes[HASH_LEN - 1] ^= 1;
        assert!(blocks_differ(&original, &BlockHash::from_bytes(bytes)));
    }
}
