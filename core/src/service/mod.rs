//! Table service contract
//!
//! The remote tabular store the access layer talks to. Anything that can
//! select, insert, update, delete and upsert rows of named tables can sit
//! behind [`TableService`]: the in-process [`MemoryService`] or a network
//! driver.

mod eval;
pub mod memory;

pub use memory::{MemoryService, TableConfig};

use crate::query::SelectRequest;
use crate::schema::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A single-row select matched no rows.
    NoRows,
    /// A single-row select matched more than one row.
    MultipleRows,
    TableNotFound,
    ConstraintViolation,
    InvalidRequest,
    /// The service could not be reached or the exchange broke down.
    Unavailable,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn is_no_rows(&self) -> bool {
        self.code == ErrorCode::NoRows
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServiceError {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectResponse {
    pub rows: Vec<Record>,
    /// Present only when the request asked for a count.
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteRequest {
    Insert {
        table: String,
        rows: Vec<Record>,
    },
    /// Set `data` on every row whose columns equal `matching`.
    Update {
        table: String,
        matching: Record,
        data: Record,
    },
    Delete {
        table: String,
        matching: Record,
    },
    /// Insert rows, or merge into the existing row sharing the comma
    /// separated `on_conflict` columns.
    Upsert {
        table: String,
        rows: Vec<Record>,
        on_conflict: String,
    },
}

impl WriteRequest {
    pub fn table(&self) -> &str {
        match self {
            WriteRequest::Insert { table, .. }
            | WriteRequest::Update { table, .. }
            | WriteRequest::Delete { table, .. }
            | WriteRequest::Upsert { table, .. } => table,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            WriteRequest::Insert { .. } => "insert",
            WriteRequest::Update { .. } => "update",
            WriteRequest::Delete { .. } => "delete",
            WriteRequest::Upsert { .. } => "upsert",
        }
    }
}

/// Rows written (or removed) by a write request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub rows: Vec<Record>,
}

#[async_trait]
pub trait TableService: Send + Sync {
    async fn select(&self, request: SelectRequest) -> ServiceResult<SelectResponse>;

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse>;

    async fn list_tables(&self) -> ServiceResult<Vec<String>>;
}
