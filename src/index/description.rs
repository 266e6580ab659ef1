//! Index descriptions
//!
//! Describes the physical index table behind a table, view or materialized
//! view: its DDL, the benefactor columns used for row-level security and the
//! extra columns compiled queries must select.

use super::dependency::SourceTableStore;
use crate::error::{QueryError, Result};
use crate::schema::{ObjectType, SchemaResolver, TableIdentity, TableKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ROW_ID: &str = "ROW_ID";
pub const ROW_VERSION: &str = "ROW_VERSION";
pub const ROW_ETAG: &str = "ROW_ETAG";
pub const ROW_BENEFACTOR: &str = "ROW_BENEFACTOR";

pub const DEFINING_SQL_WITH_GROUP_BY_ERROR: &str =
    "Currently, materialized views that aggregate (GROUP BY, DISTINCT or aggregate functions) can only reference tables, not views.";

/// Where the compiled select columns are used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlContext {
    /// Populating a materialized view's index table
    Build,
    /// Answering a user query
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenefactorDescription {
    pub column_name: String,
    pub object_type: ObjectType,
}

impl BenefactorDescription {
    pub fn new(column_name: impl Into<String>, object_type: ObjectType) -> Self {
        Self {
            column_name: column_name.into(),
            object_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexDescription {
    Table {
        table_id: TableIdentity,
    },
    View {
        table_id: TableIdentity,
        kind: TableKind,
    },
    MaterializedView {
        table_id: TableIdentity,
        dependencies: Vec<IndexDescription>,
    },
}

impl IndexDescription {
    pub fn table(table_id: TableIdentity) -> Self {
        IndexDescription::Table { table_id }
    }

    pub fn view(table_id: TableIdentity, kind: TableKind) -> Self {
        IndexDescription::View { table_id, kind }
    }

    /// Dependencies are sorted by identity and de-duplicated.
    pub fn materialized_view(table_id: TableIdentity, mut dependencies: Vec<IndexDescription>) -> Self {
        dependencies.sort_by(|a, b| a.table_id().cmp(b.table_id()));
        dependencies.dedup_by(|a, b| a.table_id() == b.table_id());
        IndexDescription::MaterializedView {
            table_id,
            dependencies,
        }
    }

    pub fn table_id(&self) -> &TableIdentity {
        match self {
            IndexDescription::Table { table_id }
            | IndexDescription::View { table_id, .. }
            | IndexDescription::MaterializedView { table_id, .. } => table_id,
        }
    }

    pub fn table_kind(&self) -> TableKind {
        match self {
            IndexDescription::Table { .. } => TableKind::Table,
            IndexDescription::View { kind, .. } => *kind,
            IndexDescription::MaterializedView { .. } => TableKind::MaterializedView,
        }
    }

    pub fn dependencies(&self) -> &[IndexDescription] {
        match self {
            IndexDescription::MaterializedView { dependencies, .. } => dependencies,
            _ => &[],
        }
    }

    /// Benefactor columns of the index table. Empty for plain tables.
    pub fn benefactors(&self) -> Vec<BenefactorDescription> {
        match self {
            IndexDescription::Table { .. } => Vec::new(),
            IndexDescription::View { kind, .. } => {
                let object_type = match kind {
                    TableKind::SubmissionView => ObjectType::Evaluation,
                    _ => ObjectType::Entity,
                };
                vec![BenefactorDescription::new(ROW_BENEFACTOR, object_type)]
            }
            IndexDescription::MaterializedView { dependencies, .. } => dependencies
                .iter()
                .flat_map(|dependency| {
                    let suffix = dependency.table_id().internal_name();
                    dependency.benefactors().into_iter().map(move |b| {
                        BenefactorDescription::new(
                            format!("{}_{}", b.column_name, suffix),
                            b.object_type,
                        )
                    })
                })
                .collect(),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for the index table
    pub fn create_or_update_index_sql(&self) -> String {
        let mut columns = Vec::new();
        let mut keys = vec![format!("PRIMARY KEY ({})", ROW_ID)];
        match self {
            IndexDescription::Table { .. } => {
                columns.push(format!("{} BIGINT NOT NULL", ROW_ID));
                columns.push(format!("{} BIGINT NOT NULL", ROW_VERSION));
            }
            IndexDescription::View { .. } => {
                columns.push(format!("{} BIGINT NOT NULL", ROW_ID));
                columns.push(format!("{} BIGINT NOT NULL", ROW_VERSION));
                columns.push(format!("{} VARCHAR(36) NOT NULL", ROW_ETAG));
                columns.push(format!("{} BIGINT NOT NULL", ROW_BENEFACTOR));
                keys.push(format!("KEY ({})", ROW_BENEFACTOR));
            }
            IndexDescription::MaterializedView { .. } => {
                columns.push(format!("{} BIGINT NOT NULL AUTO_INCREMENT", ROW_ID));
                columns.push(format!("{} BIGINT NOT NULL DEFAULT 0", ROW_VERSION));
                for benefactor in self.benefactors() {
                    columns.push(format!("{} BIGINT NOT NULL", benefactor.column_name));
                    keys.push(format!("KEY ({})", benefactor.column_name));
                }
            }
        }
        columns.extend(keys);
        format!(
            "CREATE TABLE IF NOT EXISTS {}( {})",
            self.table_id().internal_name(),
            columns.join(", ")
        )
    }

    /// Columns to prepend to a compiled select list
    pub fn column_names_to_add_to_select(
        &self,
        context: SqlContext,
        include_etag: bool,
        is_aggregate: bool,
    ) -> Result<Vec<String>> {
        match (context, self) {
            (SqlContext::Query, _) if is_aggregate => Ok(Vec::new()),
            (SqlContext::Query, IndexDescription::View { .. }) => {
                let mut columns = vec![ROW_ID.to_string(), ROW_VERSION.to_string()];
                if include_etag {
                    columns.push(ROW_ETAG.to_string());
                }
                Ok(columns)
            }
            (SqlContext::Query, _) => Ok(vec![ROW_ID.to_string(), ROW_VERSION.to_string()]),
            (SqlContext::Build, IndexDescription::MaterializedView { dependencies, .. }) => {
                let mut columns = Vec::new();
                for dependency in dependencies {
                    let table = dependency.table_id().internal_name();
                    for benefactor in dependency.benefactors() {
                        if is_aggregate {
                            return Err(QueryError::InvalidArgument(
                                DEFINING_SQL_WITH_GROUP_BY_ERROR.to_string(),
                            ));
                        }
                        columns.push(format!(
                            "IFNULL( {table}.{column} , -1) AS {table}.{column}",
                            table = table,
                            column = benefactor.column_name
                        ));
                    }
                }
                Ok(columns)
            }
            (SqlContext::Build, _) => Ok(Vec::new()),
        }
    }
}

/// Looks up the index description of a table
pub trait IndexDescriptionProvider {
    fn index_description(&self, table_id: &TableIdentity) -> Result<IndexDescription>;
}

/// Resolves descriptions from table kinds, following materialized view
/// source tables recursively.
pub struct IndexDescriptionResolver<'a> {
    schemas: &'a dyn SchemaResolver,
    sources: &'a dyn SourceTableStore,
}

impl<'a> IndexDescriptionResolver<'a> {
    pub fn new(schemas: &'a dyn SchemaResolver, sources: &'a dyn SourceTableStore) -> Self {
        Self { schemas, sources }
    }

    fn resolve(&self, table_id: &TableIdentity, path: &mut Vec<TableIdentity>) -> Result<IndexDescription> {
        if path.contains(table_id) {
            return Err(QueryError::InvalidArgument(format!(
                "Materialized view {} depends on itself",
                table_id
            )));
        }
        let description = match self.schemas.table_kind(table_id)? {
            TableKind::Table => IndexDescription::table(*table_id),
            TableKind::MaterializedView => {
                path.push(*table_id);
                let dependencies = self
                    .sources
                    .get_source_tables(table_id)?
                    .iter()
                    .map(|source| self.resolve(source, path))
                    .collect::<Result<Vec<_>>>()?;
                path.pop();
                IndexDescription::materialized_view(*table_id, dependencies)
            }
            kind => IndexDescription::view(*table_id, kind),
        };
        debug!(table_id = %table_id, kind = ?description.table_kind(), "Resolved index description");
        Ok(description)
    }
}

impl IndexDescriptionProvider for IndexDescriptionResolver<'_> {
    fn index_description(&self, table_id: &TableIdentity) -> Result<IndexDescription> {
        self.resolve(table_id, &mut Vec::new())
    }
}
