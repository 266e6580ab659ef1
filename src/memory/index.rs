//! In-memory backing index

use super::eval::{table_name, Cells, Evaluator};
use crate::error::{QueryError, Result};
use crate::execution::{ProgressContext, RowIdAndVersion, TableIndex, ValueRow, ValueStream};
use crate::index::{ROW_BENEFACTOR, ROW_ETAG, ROW_ID, ROW_VERSION};
use crate::parser::{parse_internal_query, Query};
use crate::planner::{Parameters, SqlQuery};
use crate::schema::{ObjectType, TableIdentity};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// One row of an index table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    cells: Cells,
}

impl IndexRow {
    pub fn new(row_id: i64, version: i64) -> Self {
        let mut cells = Cells::new();
        cells.insert(ROW_ID.to_string(), row_id.to_string());
        cells.insert(ROW_VERSION.to_string(), version.to_string());
        Self { cells }
    }

    /// Set any index column by its internal name
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.cells.insert(column.into(), value.into());
        self
    }

    /// Set the value of a schema column
    pub fn cell(self, column_id: i64, value: impl Into<String>) -> Self {
        self.with(format!("_C{}_", column_id), value)
    }

    /// Set a list column, stored as a JSON array
    pub fn list_cell(self, column_id: i64, values: &[&str]) -> Self {
        let json = serde_json::Value::from(values.to_vec()).to_string();
        self.cell(column_id, json)
    }

    pub fn benefactor(self, benefactor_id: i64) -> Self {
        self.with(ROW_BENEFACTOR, benefactor_id.to_string())
    }

    pub fn etag(self, etag: impl Into<String>) -> Self {
        self.with(ROW_ETAG, etag)
    }

    pub fn row_id(&self) -> Option<i64> {
        self.cells.get(ROW_ID).and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Default)]
struct IndexState {
    tables: HashMap<String, Vec<Cells>>,
    search_enabled: HashSet<TableIdentity>,
    file_sizes: HashMap<(i64, i64), i64>,
}

/// Index tables held in memory, queried with the compiled SQL
#[derive(Debug, Default)]
pub struct InMemoryTableIndex {
    state: RwLock<IndexState>,
}

impl InMemoryTableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the table if needed and append rows to it
    pub fn insert_rows(&self, table_id: TableIdentity, rows: Vec<IndexRow>) {
        self.state
            .write()
            .tables
            .entry(table_id.internal_name())
            .or_default()
            .extend(rows.into_iter().map(|r| r.cells));
    }

    pub fn drop_table(&self, table_id: &TableIdentity) {
        self.state.write().tables.remove(&table_id.internal_name());
    }

    pub fn enable_search(&self, table_id: TableIdentity) {
        self.state.write().search_enabled.insert(table_id);
    }

    pub fn set_file_size(&self, file_id: i64, version: i64, size: i64) {
        self.state.write().file_sizes.insert((file_id, version), size);
    }

    fn evaluate(&self, query: &Query, parameters: &Parameters) -> Result<Vec<ValueRow>> {
        let table = table_name(query)?;
        let state = self.state.read();
        let rows = state
            .tables
            .get(&table)
            .ok_or_else(|| QueryError::Execution(format!("Table '{}' doesn't exist", table)))?;
        let result = Evaluator::new(parameters).run(query, rows)?;
        debug!(table = %table, rows = result.len(), "Evaluated in-memory query");
        Ok(result)
    }

    fn evaluate_sql(&self, sql: &str, parameters: &Parameters) -> Result<Vec<ValueRow>> {
        self.evaluate(&parse_internal_query(sql)?, parameters)
    }
}

fn parse_long(value: Option<&Option<String>>) -> Result<i64> {
    value
        .and_then(|v| v.as_deref())
        .ok_or_else(|| QueryError::Execution("Expected a value".to_string()))?
        .parse()
        .map_err(|e| QueryError::Execution(format!("Expected a number: {}", e)))
}

impl TableIndex for InMemoryTableIndex {
    fn count_query(&self, sql: &str, parameters: &Parameters) -> Result<i64> {
        let rows = self.evaluate_sql(sql, parameters)?;
        parse_long(rows.first().and_then(|r| r.first()))
    }

    fn query_as_stream<'a>(
        &'a self,
        ctx: &'a ProgressContext,
        query: &'a SqlQuery,
    ) -> Result<ValueStream<'a>> {
        ctx.progress()?;
        let rows = self.evaluate(query.translated(), query.parameters())?;
        Ok(Box::new(rows.into_iter().map(Ok::<ValueRow, QueryError>)))
    }

    fn distinct_long_values(&self, table_id: &TableIdentity, column_name: &str) -> Result<BTreeSet<i64>> {
        let state = self.state.read();
        let rows = state.tables.get(&table_id.internal_name()).ok_or_else(|| {
            QueryError::NotFound(format!("Table '{}' doesn't exist", table_id.internal_name()))
        })?;
        rows.iter()
            .filter_map(|row| row.get(column_name))
            .map(|v| {
                v.parse()
                    .map_err(|_| QueryError::Execution(format!("{} is not a number: {}", column_name, v)))
            })
            .collect()
    }

    fn is_search_enabled(&self, table_id: &TableIdentity) -> Result<bool> {
        Ok(self.state.read().search_enabled.contains(table_id))
    }

    fn sum_of_file_sizes(&self, _object_type: ObjectType, files: &[RowIdAndVersion]) -> Result<i64> {
        let state = self.state.read();
        Ok(files
            .iter()
            .filter_map(|f| state.file_sizes.get(&(f.row_id, f.version)))
            .sum())
    }

    fn row_ids_and_versions(&self, sql: &str, parameters: &Parameters) -> Result<Vec<RowIdAndVersion>> {
        self.evaluate_sql(sql, parameters)?
            .iter()
            .map(|row| {
                Ok(RowIdAndVersion {
                    row_id: parse_long(row.first())?,
                    version: parse_long(row.get(1))?,
                })
            })
            .collect()
    }
}
