//! Schema resolution for referenced tables

use super::{ColumnSchema, TableIdentity};
use crate::error::{QueryError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TableKind {
    Table,
    #[serde(rename = "entityview")]
    EntityView,
    #[serde(rename = "submissionview")]
    SubmissionView,
    Dataset,
    #[serde(rename = "materializedview")]
    MaterializedView,
}

impl TableKind {
    /// File views and datasets. Their rows are files, so `ROW_ID` and
    /// `ROW_VERSION` identify a file.
    pub fn is_file_view_or_dataset(&self) -> bool {
        matches!(self, TableKind::EntityView | TableKind::Dataset)
    }

    pub fn is_view(&self) -> bool {
        matches!(
            self,
            TableKind::EntityView | TableKind::SubmissionView | TableKind::Dataset
        )
    }
}

/// Kind of object whose ACL a benefactor id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Entity,
    Evaluation,
}

/// Maps table identities to schemas and kinds
pub trait SchemaResolver: Send + Sync {
    /// Columns of the table, in schema order. May be empty.
    fn table_schema(&self, table_id: &TableIdentity) -> Result<Vec<ColumnSchema>>;

    fn table_kind(&self, table_id: &TableIdentity) -> Result<TableKind>;

    fn column_by_id(&self, column_id: i64) -> Result<ColumnSchema>;
}

#[derive(Debug, Clone)]
struct RegisteredTable {
    kind: TableKind,
    schema: Vec<ColumnSchema>,
}

/// Simple in-memory resolver
#[derive(Debug, Default)]
pub struct InMemorySchemaResolver {
    tables: RwLock<HashMap<TableIdentity, RegisteredTable>>,
}

impl InMemorySchemaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_table(&self, table_id: TableIdentity, kind: TableKind, schema: Vec<ColumnSchema>) {
        self.tables
            .write()
            .insert(table_id, RegisteredTable { kind, schema });
    }

    /// Exact match first, then the unversioned table.
    fn lookup(&self, table_id: &TableIdentity) -> Result<RegisteredTable> {
        let tables = self.tables.read();
        tables
            .get(table_id)
            .or_else(|| tables.get(&TableIdentity::new(table_id.id())))
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("Table {} does not exist", table_id)))
    }
}

impl SchemaResolver for InMemorySchemaResolver {
    fn table_schema(&self, table_id: &TableIdentity) -> Result<Vec<ColumnSchema>> {
        Ok(self.lookup(table_id)?.schema)
    }

    fn table_kind(&self, table_id: &TableIdentity) -> Result<TableKind> {
        Ok(self.lookup(table_id)?.kind)
    }

    fn column_by_id(&self, column_id: i64) -> Result<ColumnSchema> {
        self.tables
            .read()
            .values()
            .flat_map(|t| t.schema.iter())
            .find(|c| c.id == column_id)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("Column {} does not exist", column_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn create_test_resolver() -> InMemorySchemaResolver {
        let resolver = InMemorySchemaResolver::new();
        resolver.register_table(
            TableIdentity::new(123),
            TableKind::EntityView,
            vec![
                ColumnSchema::new(1, "foo", ColumnType::String),
                ColumnSchema::new(2, "bar", ColumnType::Integer),
            ],
        );
        resolver
    }

    #[test]
    fn test_versioned_lookup_falls_back() {
        let resolver = create_test_resolver();
        let schema = resolver
            .table_schema(&TableIdentity::with_version(123, 7))
            .unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(
            resolver.table_kind(&TableIdentity::new(123)).unwrap(),
            TableKind::EntityView
        );
    }

    #[test]
    fn test_missing_table() {
        let resolver = create_test_resolver();
        assert!(matches!(
            resolver.table_schema(&TableIdentity::new(1)),
            Err(QueryError::NotFound(_))
        ));
    }

    #[test]
    fn test_column_by_id() {
        let resolver = create_test_resolver();
        assert_eq!(resolver.column_by_id(2).unwrap().name, "bar");
        assert!(resolver.column_by_id(3).is_err());
    }

    #[test]
    fn test_kind_predicates() {
        assert!(TableKind::Dataset.is_file_view_or_dataset());
        assert!(!TableKind::SubmissionView.is_file_view_or_dataset());
        assert!(TableKind::SubmissionView.is_view());
        assert!(!TableKind::MaterializedView.is_view());
    }
}
