//! Connection management for the table server
//!
//! Bounds concurrent clients and runs one message loop per connection.

use crate::network::NetworkConnection;
use crate::network::protocol::{ProtocolHandler, ServerMessage};
use crate::service::ErrorCode;
use crate::{AtelierError, AtelierResult};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ConnectionManager {
    max_connections: Arc<Semaphore>,
    idle_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            max_connections: Arc::new(Semaphore::new(max_connections)),
            idle_timeout,
        }
    }

    pub fn available(&self) -> usize {
        self.max_connections.available_permits()
    }

    /// Serve one client until it disconnects, idles out or `shutdown` fires.
    pub async fn handle_connection(
        &self,
        socket: TcpStream,
        handler: ProtocolHandler,
        shutdown: CancellationToken,
    ) -> AtelierResult<()> {
        let _permit = self
            .max_connections
            .acquire()
            .await
            .map_err(|_| AtelierError::ConnectionLimit)?;

        Connection::new(socket, handler, self.idle_timeout, shutdown)
            .run()
            .await
    }
}

/// A single client connection.
pub struct Connection {
    id: Uuid,
    network_conn: NetworkConnection,
    handler: ProtocolHandler,
    shutdown_token: CancellationToken,
}

impl Connection {
    pub fn new(
        socket: TcpStream,
        handler: ProtocolHandler,
        idle_timeout: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            network_conn: NetworkConnection::new(socket).with_read_timeout(idle_timeout),
            handler,
            shutdown_token,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn run(mut self) -> AtelierResult<()> {
        debug!(connection = %self.id, "connection started");

        loop {
            tokio::select! {
                message_result = self.network_conn.read_message() => {
                    match message_result {
                        Ok(Some(message)) => {
                            let response = self.handler.handle_message(message).await;
                            if let Err(e) = self.network_conn.send_response(&response).await {
                                warn!(connection = %self.id, error = %e, "failed to send response");
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(AtelierError::Timeout) => {
                            info!(connection = %self.id, "connection idle, closing");
                            let response = ServerMessage::Error {
                                code: ErrorCode::Unavailable,
                                message: "Connection timed out due to inactivity".to_string(),
                                details: None,
                            };
                            let _ = self.network_conn.send_response(&response).await;
                            break;
                        }
                        Err(e) => {
                            warn!(connection = %self.id, error = %e, "failed to read message");
                            let response = ServerMessage::Error {
                                code: ErrorCode::InvalidRequest,
                                message: format!("Connection error: {}", e),
                                details: None,
                            };
                            let _ = self.network_conn.send_response(&response).await;
                            break;
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    debug!(connection = %self.id, "shutdown requested");
                    break;
                }
            }
        }

        let _ = self.network_conn.close().await;
        debug!(connection = %self.id, "connection closed");
        Ok(())
    }
}
