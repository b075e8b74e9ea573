//! Byte channels between the driver and the endpoints.

pub mod channel;
pub mod session;

pub use channel::{loopback, Channel, LoopbackChannel};
pub use session::{endpoint_command, EndpointRole, EndpointSession, ProcessChannel};
