//! Table server module
//!
//! Accepts framed client connections and serves them from a table service.

pub mod connection_manager;
pub mod table_server;

pub use connection_manager::{Connection, ConnectionManager};
pub use table_server::TableServer;
