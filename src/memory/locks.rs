//! In-memory advisory locks
//!
//! One counter per table: the number of shared holders, or -1 while held
//! exclusively. Acquisition never blocks; contention fails immediately.

use crate::error::{QueryError, Result};
use crate::execution::{TableLockGuard, TableLockManager};
use crate::schema::TableIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const EXCLUSIVE: i64 = -1;

#[derive(Debug, Default)]
pub struct InMemoryTableLocks {
    holders: Mutex<HashMap<TableIdentity, Arc<AtomicI64>>>,
}

impl InMemoryTableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, table_id: &TableIdentity) -> Arc<AtomicI64> {
        self.holders.lock().entry(*table_id).or_default().clone()
    }

    /// Exclusive lock, as taken by an index rebuild
    pub fn acquire_exclusive(&self, table_id: &TableIdentity) -> Result<TableLockGuard> {
        let counter = self.counter(table_id);
        counter
            .compare_exchange(0, EXCLUSIVE, Ordering::SeqCst, Ordering::Relaxed)
            .map_err(|_| lock_unavailable(table_id))?;
        Ok(TableLockGuard::new(*table_id, move || {
            counter.store(0, Ordering::SeqCst);
        }))
    }

    /// Current shared holders, or -1 while held exclusively
    pub fn holders(&self, table_id: &TableIdentity) -> i64 {
        self.counter(table_id).load(Ordering::SeqCst)
    }
}

fn lock_unavailable(table_id: &TableIdentity) -> QueryError {
    QueryError::LockUnavailable(format!("Table {} is locked by another process", table_id))
}

impl TableLockManager for InMemoryTableLocks {
    fn acquire_shared(&self, table_id: &TableIdentity) -> Result<TableLockGuard> {
        let counter = self.counter(table_id);
        let mut current = counter.load(Ordering::Relaxed);
        loop {
            if current == EXCLUSIVE {
                return Err(lock_unavailable(table_id));
            }
            match counter.compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        Ok(TableLockGuard::new(*table_id, move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}
