//! Table server implementation
//!
//! Owns the listening socket and hands each accepted client to the
//! [`ConnectionManager`].

use crate::config::ServerConfig;
use crate::network::ProtocolHandler;
use crate::server::ConnectionManager;
use crate::service::TableService;
use crate::AtelierResult;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct TableServer {
    config: ServerConfig,
    handler: ProtocolHandler,
    connection_manager: Arc<ConnectionManager>,
    shutdown_token: CancellationToken,
}

impl TableServer {
    pub fn new(config: ServerConfig, service: Arc<dyn TableService>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new(
            config.max_connections,
            Duration::from_secs(config.idle_timeout_secs),
        ));

        Self {
            config,
            handler: ProtocolHandler::new(service),
            connection_manager,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Bind the configured address. Port 0 picks a free port.
    pub async fn bind(&self) -> AtelierResult<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "atelierd listening");
        Ok(listener)
    }

    /// Bind and serve until shutdown.
    pub async fn start(&self) -> AtelierResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> AtelierResult<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => self.spawn_connection(socket, addr),
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("shutdown signal received, stopping connection acceptance");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        debug!(peer = %addr, "new connection");
        if let Err(e) = socket.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
        }

        let connection_manager = Arc::clone(&self.connection_manager);
        let handler = self.handler.clone();
        let shutdown = self.shutdown_token.child_token();

        tokio::spawn(async move {
            if let Err(e) = connection_manager
                .handle_connection(socket, handler, shutdown)
                .await
            {
                error!(peer = %addr, error = %e, "error handling connection");
            }
        });
    }

    /// Stop accepting and close every open connection.
    pub fn shutdown(&self) {
        info!("shutting down atelierd");
        self.shutdown_token.cancel();
    }

    /// Get shutdown token for external shutdown coordination
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{ClientMessage, NetworkConnection, ServerMessage};
    use crate::service::MemoryService;
    use pretty_assertions::assert_eq;

    fn server() -> Arc<TableServer> {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        Arc::new(TableServer::new(config, Arc::new(MemoryService::new())))
    }

    #[tokio::test]
    async fn test_ping_then_shutdown() {
        let server = server();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let serving = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };

        let mut conn = NetworkConnection::connect(&addr).await.unwrap();
        conn.send_message(&ClientMessage::Ping).await.unwrap();
        assert_eq!(conn.read_response().await.unwrap(), Some(ServerMessage::Pong));

        server.shutdown();
        serving.await.unwrap().unwrap();
        // Open connections are closed too.
        assert_eq!(conn.read_response().await.unwrap(), None);
    }
}
