//! Collaborators the engine consumes: authorization and the backing index

use super::bundle::{Row, RowSet};
use super::progress::ProgressContext;
use crate::error::Result;
use crate::index::IndexDescription;
use crate::planner::{Parameters, SqlQuery};
use crate::schema::{ObjectType, TableIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity of the user running a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowIdAndVersion {
    pub row_id: i64,
    pub version: i64,
}

/// Raw output values of one row, system columns first
pub type ValueRow = Vec<Option<String>>;

/// Lazily pulled rows of a running query
pub type ValueStream<'a> = Box<dyn Iterator<Item = Result<ValueRow>> + Send + 'a>;

pub trait Authorizer: Send + Sync {
    /// `Ok(())` when the caller may read the table, `Unauthorized` otherwise
    fn can_read_table(&self, caller: PrincipalId, description: &IndexDescription) -> Result<()>;

    /// The subset of `candidates` the caller may read
    fn accessible_benefactors(
        &self,
        caller: PrincipalId,
        object_type: ObjectType,
        candidates: &BTreeSet<i64>,
    ) -> Result<BTreeSet<i64>>;
}

/// Executes compiled SQL against the backing index
pub trait TableIndex: Send + Sync {
    fn count_query(&self, sql: &str, parameters: &Parameters) -> Result<i64>;

    fn query_as_stream<'a>(
        &'a self,
        ctx: &'a ProgressContext,
        query: &'a SqlQuery,
    ) -> Result<ValueStream<'a>>;

    /// All rows of a query, system columns split off
    fn query(&self, ctx: &ProgressContext, query: &SqlQuery) -> Result<RowSet> {
        let rows = self
            .query_as_stream(ctx, query)?
            .map(|values| {
                ctx.progress()?;
                Row::from_values(query.row_columns(), values?)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RowSet {
            table_id: query.table_id().to_string(),
            etag: None,
            headers: query.select_columns().to_vec(),
            rows,
        })
    }

    /// Distinct values of a BIGINT column. Fails when the table does not exist.
    fn distinct_long_values(&self, table_id: &TableIdentity, column_name: &str) -> Result<BTreeSet<i64>>;

    fn is_search_enabled(&self, table_id: &TableIdentity) -> Result<bool>;

    fn sum_of_file_sizes(&self, object_type: ObjectType, files: &[RowIdAndVersion]) -> Result<i64>;

    fn row_ids_and_versions(&self, sql: &str, parameters: &Parameters) -> Result<Vec<RowIdAndVersion>>;
}
