//! Advisory table locks
//!
//! Consistent reads hold a non-exclusive lock on the table so a concurrent
//! rebuild cannot be observed half way. Contention surfaces as
//! [`QueryError::LockUnavailable`], which the caller may retry.

use crate::error::Result;
use crate::schema::TableIdentity;
use std::fmt;

pub trait TableLockManager: Send + Sync {
    /// Non-exclusive lock, held until the guard drops
    fn acquire_shared(&self, table_id: &TableIdentity) -> Result<TableLockGuard>;
}

/// RAII guard for an advisory lock
pub struct TableLockGuard {
    table_id: TableIdentity,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl TableLockGuard {
    pub fn new(table_id: TableIdentity, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            table_id,
            release: Some(Box::new(release)),
        }
    }

    pub fn table_id(&self) -> &TableIdentity {
        &self.table_id
    }
}

impl Drop for TableLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for TableLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableLockGuard")
            .field("table_id", &self.table_id)
            .finish()
    }
}

/// Run `body` while holding a non-exclusive lock on the table
pub fn with_non_exclusive_lock<T>(
    locks: &dyn TableLockManager,
    table_id: &TableIdentity,
    body: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let _guard = locks.acquire_shared(table_id)?;
    body()
}
