use crate::service::ServiceError;
use thiserror::Error;

pub type AtelierResult<T> = Result<T, AtelierError>;

#[derive(Error, Debug)]
pub enum AtelierError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query error: {0}")]
    Query(ServiceError),

    #[error("Mutation error: {0}")]
    Mutation(ServiceError),

    #[error("Missing primary key column '{column}' for table '{table}'")]
    MissingPrimaryKey { table: String, column: String },

    #[error("Invalid search mode: {0}")]
    InvalidSearchMode(String),

    #[error("Invalid pagination: page {page}, page size {page_size}")]
    InvalidPagination { page: u64, page_size: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection limit reached")]
    ConnectionLimit,

    #[error("Operation timed out")]
    Timeout,
}

impl AtelierError {
    /// The service error behind a failed fetch or mutation.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            AtelierError::Query(e) | AtelierError::Mutation(e) => Some(e),
            _ => None,
        }
    }
}
