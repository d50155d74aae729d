//! Network communication module
//!
//! Length-prefixed JSON framing between `atelierd` and its clients.

pub mod connection;
pub mod protocol;

pub use connection::NetworkConnection;
pub use protocol::{ClientMessage, MAX_MESSAGE_SIZE, ProtocolHandler, ServerMessage};
