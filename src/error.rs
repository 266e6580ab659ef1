//! Error types for the table query engine

use crate::execution::TableStatus;
use thiserror::Error;

/// Result type alias for table query operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Main error type for the table query engine
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed input: missing argument, unsupported JOIN, ambiguous column,
    /// full text search on a table without search enabled.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The index is being built. The caller may retry after a delay.
    #[error("Table unavailable: {} is {:?}", .0.table_id, .0.state)]
    TableUnavailable(TableStatus),

    #[error("Table failed: {} ({})", .0.table_id, .0.error_message.as_deref().unwrap_or("no message"))]
    TableFailed(TableStatus),

    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// The table has no columns.
    #[error("Schema for {table_id} is empty.")]
    EmptyResult { table_id: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Transient conditions the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::TableUnavailable(_) | QueryError::LockUnavailable(_)
        )
    }
}

impl From<sqlparser::parser::ParserError> for QueryError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        QueryError::Parse(e.to_string())
    }
}

impl From<csv::Error> for QueryError {
    fn from(e: csv::Error) -> Self {
        QueryError::Execution(e.to_string())
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::InvalidArgument(e.to_string())
    }
}
