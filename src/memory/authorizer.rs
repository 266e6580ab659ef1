//! In-memory authorization

use crate::error::{QueryError, Result};
use crate::execution::{Authorizer, PrincipalId};
use crate::index::IndexDescription;
use crate::schema::{ObjectType, TableIdentity};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Grants benefactor access per principal. Every table is readable unless
/// explicitly denied.
#[derive(Debug, Default)]
pub struct InMemoryAuthorizer {
    grants: RwLock<HashMap<(PrincipalId, ObjectType), BTreeSet<i64>>>,
    denied: RwLock<HashSet<(PrincipalId, TableIdentity)>>,
    calls: AtomicUsize,
}

impl InMemoryAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(
        &self,
        caller: PrincipalId,
        object_type: ObjectType,
        benefactor_ids: impl IntoIterator<Item = i64>,
    ) {
        self.grants
            .write()
            .entry((caller, object_type))
            .or_default()
            .extend(benefactor_ids);
    }

    pub fn deny_read(&self, caller: PrincipalId, table_id: TableIdentity) {
        self.denied.write().insert((caller, table_id));
    }

    /// Number of benefactor lookups made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Authorizer for InMemoryAuthorizer {
    fn can_read_table(&self, caller: PrincipalId, description: &IndexDescription) -> Result<()> {
        if self.denied.read().contains(&(caller, *description.table_id())) {
            return Err(QueryError::Unauthorized(format!(
                "You do not have READ permission for the requested entity, {}.",
                description.table_id()
            )));
        }
        Ok(())
    }

    fn accessible_benefactors(
        &self,
        caller: PrincipalId,
        object_type: ObjectType,
        candidates: &BTreeSet<i64>,
    ) -> Result<BTreeSet<i64>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let grants = self.grants.read();
        Ok(match grants.get(&(caller, object_type)) {
            Some(granted) => candidates.intersection(granted).copied().collect(),
            None => BTreeSet::new(),
        })
    }
}
