//! Incremental image chains.
//!
//! A chain is a base image (a plain full copy of the device) plus up to
//! [`MAX_INCREMENTS`] sparse increment files named `<base>.iimg000`,
//! `<base>.iimg001`, ... Each increment only holds the blocks that changed
//! since the chain state it was written against.

pub mod cursor;
pub mod merge;
pub mod record;
pub mod writer;

pub use cursor::IncrementCursor;
pub use merge::{Block, ChainReader};
pub use record::{IncrementHeader, RecordHeader, FORMAT_VERSION, RECORD_HEADER_LEN};
pub use writer::IncrementWriter;

use crate::error::{Result, SyncError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Maximum number of increments per chain (`.iimg000` to `.iimg999`)
pub const MAX_INCREMENTS: usize = 1000;

/// Extension prefix of increment files
pub const INCREMENT_EXTENSION: &str = "iimg";

/// Path of increment `seq` of the chain rooted at `base`.
pub fn increment_path(base: &Path, seq: usize) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!(".{}{:03}", INCREMENT_EXTENSION, seq));
    PathBuf::from(name)
}

/// Split `<base>.iimgNNN` into the base image path and `NNN`.
pub fn parse_increment_path(path: &Path) -> Result<(PathBuf, usize)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let Some(number) = ext.strip_prefix(INCREMENT_EXTENSION) else {
        return Err(SyncError::Config(format!(
            "increment file extension must start with `.{}', got `.{}'",
            INCREMENT_EXTENSION, ext
        )));
    };
    let seq: usize = number.parse().map_err(|_| {
        SyncError::Config(format!(
            "increment file extension must end with the increment number, got `.{}'",
            ext
        ))
    })?;
    if seq >= MAX_INCREMENTS {
        return Err(SyncError::Config(format!(
            "increment number {} exceeds the chain limit of {}",
            seq, MAX_INCREMENTS
        )));
    }

    Ok((path.with_extension(""), seq))
}

/// Existing increments of `base`, in creation order.
///
/// Numbering is consecutive: the first missing number ends the chain.
pub async fn discover_increments(base: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for seq in 0..MAX_INCREMENTS {
        let path = increment_path(base, seq);
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            break;
        }
        found.push(path);
    }
    Ok(found)
}

/// Existing increments plus the path of the next one to create.
///
/// Fails with a chain error once all [`MAX_INCREMENTS`] slots are taken.
pub async fn next_increment(base: &Path) -> Result<(Vec<PathBuf>, PathBuf)> {
    let existing = discover_increments(base).await?;
    if existing.len() >= MAX_INCREMENTS {
        return Err(SyncError::chain(
            base,
            format!("can not make more than {} incremental images", MAX_INCREMENTS),
        ));
    }
    let next = increment_path(base, existing.len());
    Ok((existing, next))
}

/// Open the chain truncated at `increment` (`<base>.iimgNNN`) for reading.
///
/// The block size of increment 000 becomes the chain's block size; every
/// increment up to `NNN` must exist.
pub async fn open_at(increment: &Path) -> Result<ChainReader> {
    let (base, last) = parse_increment_path(increment)?;
    let paths: Vec<PathBuf> = (0..=last).map(|seq| increment_path(&base, seq)).collect();

    let first = IncrementCursor::open(&paths[0]).await?;
    let block_size = first.block_size();
    drop(first);

    ChainReader::open(&base, &paths, block_size).await
}
