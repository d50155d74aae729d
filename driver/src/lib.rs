//! Network driver for `atelierd`
//!
//! [`RemoteService`] implements [`TableService`] over the framed JSON
//! protocol, so a [`TableClient`](atelier_core::access::TableClient) can
//! sit on top of a remote table server exactly as it does on top of an
//! in-process one.

use async_trait::async_trait;
use atelier_core::network::{ClientMessage, NetworkConnection, ServerMessage};
use atelier_core::query::SelectRequest;
use atelier_core::service::{
    ErrorCode, SelectResponse, ServiceError, ServiceResult, TableService, WriteRequest,
    WriteResponse,
};
use atelier_core::{AtelierError, AtelierResult};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

#[derive(Default)]
struct DriverState {
    connection: Option<NetworkConnection>,
    last_heartbeat: Option<Instant>,
}

pub struct RemoteService {
    state: Mutex<DriverState>,
    server_address: String,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    request_timeout: Duration,
}

impl RemoteService {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(DriverState::default()),
            server_address: address.into(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_heartbeat_config(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Connect now instead of on the first request.
    pub async fn connect(&self) -> AtelierResult<()> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connection.is_some()
    }

    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut connection) = state.connection.take() {
            let _ = connection.close().await;
        }
        state.last_heartbeat = None;
    }

    /// Round-trip a ping and report how long it took.
    pub async fn ping(&self) -> AtelierResult<Duration> {
        let mut state = self.state.lock().await;
        self.ensure_connection(&mut state).await?;
        let start = Instant::now();
        match self.heartbeat(&mut state).await {
            Ok(()) => Ok(start.elapsed()),
            Err(e) => {
                state.connection = None;
                Err(e)
            }
        }
    }

    async fn connect_locked(&self, state: &mut DriverState) -> AtelierResult<()> {
        if state.connection.is_some() {
            return Ok(());
        }

        let mut connection = NetworkConnection::connect(&self.server_address).await?;
        connection.send_message(&ClientMessage::Ping).await?;

        match timeout(self.heartbeat_timeout, connection.read_response()).await {
            Ok(Ok(Some(ServerMessage::Pong))) => {
                debug!(addr = %self.server_address, "connected");
                state.connection = Some(connection);
                state.last_heartbeat = Some(Instant::now());
                Ok(())
            }
            Ok(Ok(Some(ServerMessage::Error { message, .. }))) => Err(AtelierError::Protocol(
                format!("Server error during ping: {}", message),
            )),
            Ok(Ok(Some(response))) => Err(AtelierError::Protocol(format!(
                "Unexpected response to ping: {:?}",
                response
            ))),
            Ok(Ok(None)) => Err(AtelierError::Connection(
                "Connection closed during handshake".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AtelierError::Timeout),
        }
    }

    /// Reconnect if the last heartbeat is overdue and fails.
    async fn ensure_connection(&self, state: &mut DriverState) -> AtelierResult<()> {
        if let Some(last_heartbeat) = state.last_heartbeat
            && last_heartbeat.elapsed() >= self.heartbeat_interval
            && state.connection.is_some()
            && let Err(e) = self.heartbeat(state).await
        {
            warn!(addr = %self.server_address, error = %e, "heartbeat failed, reconnecting");
            state.connection = None;
            state.last_heartbeat = None;
        }

        self.connect_locked(state).await
    }

    async fn heartbeat(&self, state: &mut DriverState) -> AtelierResult<()> {
        let connection = state
            .connection
            .as_mut()
            .ok_or_else(|| AtelierError::Connection("No connection available".to_string()))?;
        connection.send_message(&ClientMessage::Ping).await?;

        match timeout(self.heartbeat_timeout, connection.read_response()).await {
            Ok(Ok(Some(ServerMessage::Pong))) => {
                state.last_heartbeat = Some(Instant::now());
                Ok(())
            }
            Ok(Ok(Some(response))) => Err(AtelierError::Protocol(format!(
                "Unexpected heartbeat response: {:?}",
                response
            ))),
            Ok(Ok(None)) => Err(AtelierError::Connection(
                "Connection closed during heartbeat".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AtelierError::Timeout),
        }
    }

    /// Send one message and wait for its response. Transport failures drop
    /// the connection so the next request reconnects.
    async fn request(&self, message: ClientMessage) -> ServiceResult<ServerMessage> {
        let mut state = self.state.lock().await;
        self.ensure_connection(&mut state)
            .await
            .map_err(unavailable)?;

        let result = match state.connection.as_mut() {
            Some(connection) => self.exchange(connection, &message).await,
            None => Err(AtelierError::Connection("No connection available".to_string())),
        };

        match result {
            Ok(ServerMessage::Error {
                code,
                message,
                details,
            }) => Err(ServiceError {
                code,
                message,
                details,
            }),
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(addr = %self.server_address, error = %e, "request failed, dropping connection");
                state.connection = None;
                state.last_heartbeat = None;
                Err(unavailable(e))
            }
        }
    }

    async fn exchange(
        &self,
        connection: &mut NetworkConnection,
        message: &ClientMessage,
    ) -> AtelierResult<ServerMessage> {
        connection.send_message(message).await?;
        match timeout(self.request_timeout, connection.read_response()).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(AtelierError::Connection(
                "Connection closed by server".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AtelierError::Timeout),
        }
    }
}

fn unavailable(e: AtelierError) -> ServiceError {
    ServiceError::new(ErrorCode::Unavailable, "table server unavailable").with_details(e.to_string())
}

fn unexpected(response: ServerMessage) -> ServiceError {
    ServiceError::new(ErrorCode::InternalError, "unexpected response from server")
        .with_details(format!("{:?}", response))
}

#[async_trait]
impl TableService for RemoteService {
    async fn select(&self, request: SelectRequest) -> ServiceResult<SelectResponse> {
        match self.request(ClientMessage::Select(request)).await? {
            ServerMessage::Rows { rows, count } => Ok(SelectResponse { rows, count }),
            other => Err(unexpected(other)),
        }
    }

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        match self.request(ClientMessage::Write(request)).await? {
            ServerMessage::Written { rows } => Ok(WriteResponse { rows }),
            other => Err(unexpected(other)),
        }
    }

    async fn list_tables(&self) -> ServiceResult<Vec<String>> {
        match self.request(ClientMessage::ListTables).await? {
            ServerMessage::TableList { tables } => Ok(tables),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let service = RemoteService::new(addr);

        let err = service.list_tables().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
        assert!(!service.is_connected().await);
    }
}
