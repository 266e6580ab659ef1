//! Materialized view dependencies
//!
//! Tracks which source tables feed each materialized view. Registration
//! diffs the defining SQL's tables against the stored set and writes only
//! the difference.

use crate::error::{QueryError, Result};
use crate::parser::{parse_query, select_of, table_factors, ObjectNameExt, TableFactor};
use crate::planner::JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT;
use crate::schema::TableIdentity;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Write access to one view's source-table record inside a transaction
pub trait SourceTableWriter {
    fn current(&self) -> BTreeSet<TableIdentity>;
    fn add(&mut self, tables: &BTreeSet<TableIdentity>);
    fn delete(&mut self, tables: &BTreeSet<TableIdentity>);
}

/// Persistent view id to source tables record.
///
/// `in_write_transaction` must run `work` atomically against the view's
/// record so concurrent registrations cannot lose updates.
pub trait SourceTableStore: Send + Sync {
    fn get_source_tables(&self, view_id: &TableIdentity) -> Result<BTreeSet<TableIdentity>>;

    fn in_write_transaction(
        &self,
        view_id: &TableIdentity,
        work: &mut dyn FnMut(&mut dyn SourceTableWriter) -> Result<()>,
    ) -> Result<()>;
}

/// A single add or delete issued against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTableOp {
    Add(TableIdentity, BTreeSet<TableIdentity>),
    Delete(TableIdentity, BTreeSet<TableIdentity>),
}

/// Source tables held in memory. Every add/delete is appended to an
/// operation log.
#[derive(Debug, Default)]
pub struct InMemorySourceTableStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<TableIdentity, BTreeSet<TableIdentity>>,
    ops: Vec<SourceTableOp>,
}

impl InMemorySourceTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without logging an operation
    pub fn insert(&self, view_id: TableIdentity, sources: BTreeSet<TableIdentity>) {
        self.state.lock().tables.insert(view_id, sources);
    }

    pub fn operations(&self) -> Vec<SourceTableOp> {
        self.state.lock().ops.clone()
    }
}

struct InMemoryWriter<'a> {
    view_id: TableIdentity,
    state: &'a mut StoreState,
}

impl SourceTableWriter for InMemoryWriter<'_> {
    fn current(&self) -> BTreeSet<TableIdentity> {
        self.state.tables.get(&self.view_id).cloned().unwrap_or_default()
    }

    fn add(&mut self, tables: &BTreeSet<TableIdentity>) {
        self.state
            .tables
            .entry(self.view_id)
            .or_default()
            .extend(tables.iter().copied());
        self.state.ops.push(SourceTableOp::Add(self.view_id, tables.clone()));
    }

    fn delete(&mut self, tables: &BTreeSet<TableIdentity>) {
        if let Some(current) = self.state.tables.get_mut(&self.view_id) {
            current.retain(|t| !tables.contains(t));
        }
        self.state.ops.push(SourceTableOp::Delete(self.view_id, tables.clone()));
    }
}

impl SourceTableStore for InMemorySourceTableStore {
    fn get_source_tables(&self, view_id: &TableIdentity) -> Result<BTreeSet<TableIdentity>> {
        Ok(self.state.lock().tables.get(view_id).cloned().unwrap_or_default())
    }

    fn in_write_transaction(
        &self,
        view_id: &TableIdentity,
        work: &mut dyn FnMut(&mut dyn SourceTableWriter) -> Result<()>,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let snapshot_tables = guard.tables.clone();
        let snapshot_ops = guard.ops.len();
        let mut writer = InMemoryWriter {
            view_id: *view_id,
            state: &mut *guard,
        };
        let result = work(&mut writer);
        if result.is_err() {
            guard.tables = snapshot_tables;
            guard.ops.truncate(snapshot_ops);
        }
        result
    }
}

/// What a registration changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTableChanges {
    pub added: BTreeSet<TableIdentity>,
    pub removed: BTreeSet<TableIdentity>,
}

impl SourceTableChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct MaterializedViewDependencyManager<'a> {
    store: &'a dyn SourceTableStore,
}

impl<'a> MaterializedViewDependencyManager<'a> {
    pub fn new(store: &'a dyn SourceTableStore) -> Self {
        Self { store }
    }

    /// Check a defining SQL: non-blank, parses, one table.
    pub fn validate(defining_sql: &str) -> Result<()> {
        if defining_sql.trim().is_empty() {
            return Err(QueryError::InvalidArgument(
                "The definingSQL of the materialized view is required and must not be the empty string.".to_string(),
            ));
        }
        if Self::source_tables(defining_sql)?.len() > 1 {
            return Err(QueryError::InvalidArgument(
                JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT.to_string(),
            ));
        }
        Ok(())
    }

    /// Every table referenced by the defining SQL
    pub fn source_tables(defining_sql: &str) -> Result<BTreeSet<TableIdentity>> {
        let query = parse_query(defining_sql)?;
        let select = select_of(&query)?;
        table_factors(select)
            .into_iter()
            .map(|factor| match factor {
                TableFactor::Table { name, .. } => TableIdentity::parse(&name.table_name()),
                other => Err(QueryError::InvalidArgument(format!(
                    "Unsupported table reference: {}",
                    other
                ))),
            })
            .collect()
    }

    /// Store the source tables of a view, touching only what changed.
    pub fn register_source_tables(
        &self,
        view_id: &TableIdentity,
        defining_sql: &str,
    ) -> Result<SourceTableChanges> {
        let target = Self::source_tables(defining_sql)?;
        let mut changes = SourceTableChanges::default();
        self.store.in_write_transaction(view_id, &mut |writer: &mut dyn SourceTableWriter| {
            let current = writer.current();
            changes.removed = current.difference(&target).copied().collect();
            changes.added = target.difference(&current).copied().collect();
            if !changes.removed.is_empty() {
                writer.delete(&changes.removed);
            }
            if !changes.added.is_empty() {
                writer.add(&changes.added);
            }
            Ok(())
        })?;

        if changes.is_empty() {
            debug!(view_id = %view_id, "Source tables unchanged");
        } else {
            info!(
                view_id = %view_id,
                added = changes.added.len(),
                removed = changes.removed.len(),
                "Updated materialized view source tables"
            );
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(text: &str) -> TableIdentity {
        TableIdentity::parse(text).unwrap()
    }

    fn set(ids: &[&str]) -> BTreeSet<TableIdentity> {
        ids.iter().map(|t| id(t)).collect()
    }

    #[test]
    fn test_source_tables() {
        assert_eq!(
            MaterializedViewDependencyManager::source_tables("select * from syn123").unwrap(),
            set(&["syn123"])
        );
        assert_eq!(
            MaterializedViewDependencyManager::source_tables(
                "select * from syn123.2 a join syn456 b on a.id = b.id"
            )
            .unwrap(),
            set(&["syn123.2", "syn456"])
        );
    }

    #[test]
    fn test_validate() {
        assert!(MaterializedViewDependencyManager::validate("select * from syn123").is_ok());
        assert!(matches!(
            MaterializedViewDependencyManager::validate("  "),
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            MaterializedViewDependencyManager::validate("select * from"),
            Err(QueryError::Parse(_))
        ));
        let err = MaterializedViewDependencyManager::validate(
            "select * from syn1 join syn2 on syn1.a = syn2.a",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Invalid argument: {}", JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT)
        );
    }

    #[test]
    fn test_register_is_idempotent() {
        let store = InMemorySourceTableStore::new();
        let manager = MaterializedViewDependencyManager::new(&store);
        let view = id("syn1");

        let first = manager
            .register_source_tables(&view, "select * from syn123")
            .unwrap();
        assert_eq!(first.added, set(&["syn123"]));
        assert_eq!(store.operations().len(), 1);

        let second = manager
            .register_source_tables(&view, "select * from syn123")
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(store.operations().len(), 1);
    }

    #[test]
    fn test_register_diffs_against_stored() {
        let store = InMemorySourceTableStore::new();
        store.insert(id("syn1"), set(&["syn2", "syn3"]));
        let manager = MaterializedViewDependencyManager::new(&store);

        let changes = manager
            .register_source_tables(&id("syn1"), "select * from syn3 a join syn4 b on a.x = b.x")
            .unwrap();
        assert_eq!(changes.added, set(&["syn4"]));
        assert_eq!(changes.removed, set(&["syn2"]));
        assert_eq!(
            store.operations(),
            vec![
                SourceTableOp::Delete(id("syn1"), set(&["syn2"])),
                SourceTableOp::Add(id("syn1"), set(&["syn4"])),
            ]
        );
        assert_eq!(store.get_source_tables(&id("syn1")).unwrap(), set(&["syn3", "syn4"]));
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = InMemorySourceTableStore::new();
        let result = store.in_write_transaction(&id("syn1"), &mut |writer: &mut dyn SourceTableWriter| {
            writer.add(&set(&["syn9"]));
            Err(QueryError::Internal("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get_source_tables(&id("syn1")).unwrap().is_empty());
        assert!(store.operations().is_empty());
    }
}
