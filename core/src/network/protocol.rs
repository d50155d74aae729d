use crate::query::SelectRequest;
use crate::schema::Record;
use crate::service::{ErrorCode, ServiceError, TableService, WriteRequest};
use crate::{AtelierError, AtelierResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1MB max message size

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Select(SelectRequest),
    Write(WriteRequest),
    Ping,
    ListTables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Rows {
        rows: Vec<Record>,
        count: Option<u64>,
    },
    Written {
        rows: Vec<Record>,
    },
    Pong,
    TableList {
        tables: Vec<String>,
    },
    Error {
        code: ErrorCode,
        message: String,
        details: Option<String>,
    },
}

impl From<ServiceError> for ServerMessage {
    fn from(e: ServiceError) -> Self {
        ServerMessage::Error {
            code: e.code,
            message: e.message,
            details: e.details,
        }
    }
}

/// Dispatches client messages to a table service.
#[derive(Clone)]
pub struct ProtocolHandler {
    service: Arc<dyn TableService>,
}

impl ProtocolHandler {
    pub fn new(service: Arc<dyn TableService>) -> Self {
        Self { service }
    }

    pub async fn handle_message(&self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Select(request) => {
                debug!(table = %request.table, "select");
                match self.service.select(request).await {
                    Ok(response) => ServerMessage::Rows {
                        rows: response.rows,
                        count: response.count,
                    },
                    Err(e) => e.into(),
                }
            }
            ClientMessage::Write(request) => {
                debug!(table = request.table(), action = request.action(), "write");
                match self.service.write(request).await {
                    Ok(response) => ServerMessage::Written {
                        rows: response.rows,
                    },
                    Err(e) => e.into(),
                }
            }
            ClientMessage::Ping => ServerMessage::Pong,
            ClientMessage::ListTables => match self.service.list_tables().await {
                Ok(tables) => ServerMessage::TableList { tables },
                Err(e) => e.into(),
            },
        }
    }
}

impl ClientMessage {
    pub fn from_bytes(bytes: &[u8]) -> AtelierResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| AtelierError::Protocol(e.to_string()))
    }

    pub fn to_bytes(&self) -> AtelierResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl ServerMessage {
    pub fn from_bytes(bytes: &[u8]) -> AtelierResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| AtelierError::Protocol(e.to_string()))
    }

    pub fn to_bytes(&self) -> AtelierResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
