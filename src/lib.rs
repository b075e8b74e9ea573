//! Block-level device sync into an append-only chain of incremental images.
//!
//! Three parties take part in a session: a source endpoint next to the
//! device, a chain writer endpoint next to the backup chain, and the driver
//! relaying between them. Only blocks whose hashes differ cross the wire, and
//! every session appends exactly one increment to the chain.

pub mod chain;
pub mod config;
pub mod error;
pub mod hash;
pub mod protocol;
pub mod restore;
pub mod server;
pub mod sync;
pub mod transport;

pub use config::{EndpointSpec, RemoteHost, SyncConfig};
pub use error::{Peer, Result, SyncError};
pub use hash::{blocks_differ, BlockHash};
