//! Build status of a table's index

use crate::error::{QueryError, Result};
use crate::schema::TableIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableState {
    Available,
    Processing,
    ProcessingFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub table_id: String,
    pub state: TableState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change_etag: Option<String>,
    pub changed_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TableStatus {
    pub fn new(table_id: impl Into<String>, state: TableState) -> Self {
        Self {
            table_id: table_id.into(),
            state,
            last_change_etag: None,
            changed_on: Utc::now(),
            error_message: None,
        }
    }

    pub fn with_last_change_etag(mut self, etag: impl Into<String>) -> Self {
        self.last_change_etag = Some(etag.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

pub trait TableStatusProvider: Send + Sync {
    /// Current status, creating a PROCESSING status for unknown tables
    fn status_or_create(&self, table_id: &TableIdentity) -> Result<TableStatus>;
}

/// The status when AVAILABLE; otherwise the matching failure with the
/// status attached.
pub fn validate_table_is_available(
    provider: &dyn TableStatusProvider,
    table_id: &TableIdentity,
) -> Result<TableStatus> {
    let status = provider.status_or_create(table_id)?;
    match status.state {
        TableState::Available => Ok(status),
        TableState::Processing => Err(QueryError::TableUnavailable(status)),
        TableState::ProcessingFailed => Err(QueryError::TableFailed(status)),
    }
}
