//! In-memory table status

use crate::error::Result;
use crate::execution::{TableState, TableStatus, TableStatusProvider};
use crate::schema::TableIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Status per table. Unknown tables are created as PROCESSING.
#[derive(Debug, Default)]
pub struct InMemoryTableStatus {
    statuses: Mutex<HashMap<TableIdentity, TableStatus>>,
}

impl InMemoryTableStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, table_id: TableIdentity, status: TableStatus) {
        self.statuses.lock().insert(table_id, status);
    }

    /// Mark a table AVAILABLE
    pub fn set_available(&self, table_id: TableIdentity) {
        self.set_status(
            table_id,
            TableStatus::new(table_id.public_name(), TableState::Available),
        );
    }
}

impl TableStatusProvider for InMemoryTableStatus {
    fn status_or_create(&self, table_id: &TableIdentity) -> Result<TableStatus> {
        Ok(self
            .statuses
            .lock()
            .entry(*table_id)
            .or_insert_with(|| TableStatus::new(table_id.public_name(), TableState::Processing))
            .clone())
    }
}
