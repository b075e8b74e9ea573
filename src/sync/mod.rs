//! Driver side of a sync session.

pub mod driver;
pub mod progress;
pub mod session;

pub use driver::{SyncDriver, SyncStats};
pub use progress::{ProgressMeter, Snapshot};
pub use session::{run_session, source_handshake, sync_chain, writer_handshake, SessionReport};
