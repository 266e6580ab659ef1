//! Table & column mapping
//!
//! Resolves every table referenced by a query against its schema and binds
//! column references to exactly one table column.

use crate::error::{QueryError, Result};
use crate::index::{ROW_ID, ROW_VERSION};
use crate::parser::{
    parse_order_by, parse_select_list, quote_identifier, table_factors, Expr, ObjectName,
    ObjectNameExt, OrderBy, Select, SelectItem, TableFactor,
};
use crate::schema::{ColumnSchema, ColumnType, SchemaResolver, TableIdentity, TableKind};

pub const JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT: &str =
    "The JOIN keyword is not supported in this context";

/// One table (or alias) referenced by a query
#[derive(Debug, Clone)]
pub struct TableInfo {
    identity: TableIdentity,
    index: usize,
    original_name: String,
    alias: Option<String>,
    kind: TableKind,
    schema: Vec<ColumnSchema>,
}

impl TableInfo {
    pub fn identity(&self) -> &TableIdentity {
        &self.identity
    }

    /// 0-based position in the query
    pub fn index(&self) -> usize {
        self.index
    }

    /// Table name as written in the query
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    /// Name of the table in backing-index SQL: `_A<index>` when aliased,
    /// `T<id>` otherwise.
    pub fn translated_name(&self) -> String {
        match self.alias {
            Some(_) => format!("_A{}", self.index),
            None => self.identity.internal_name(),
        }
    }

    /// Identity match. Aliases are ignored on both sides.
    pub fn is_match(&self, name: &ObjectName) -> bool {
        TableIdentity::parse(&name.table_name())
            .map(|id| id == self.identity)
            .unwrap_or(false)
    }

    pub(crate) fn matches_qualifier(&self, qualifier: &str) -> bool {
        if let Some(alias) = &self.alias {
            if alias == qualifier {
                return true;
            }
        }
        TableIdentity::parse(qualifier)
            .map(|id| id == self.identity)
            .unwrap_or(false)
    }

    fn lookup_column(&self, reference: &ColumnReference) -> Option<&ColumnSchema> {
        if let Some(qualifier) = &reference.qualifier {
            if !self.matches_qualifier(qualifier) {
                return None;
            }
        }
        self.schema.iter().find(|c| c.name == reference.name)
    }
}

/// A column reference as written: `foo`, `"has space"`, `t.foo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    pub qualifier: Option<String>,
    pub name: String,
    text: String,
}

impl ColumnReference {
    pub fn unqualified(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            text: quote_identifier(&name),
            qualifier: None,
            name,
        }
    }

    /// None if the expression is not a plain or table-qualified identifier
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Identifier(ident) => Some(Self {
                qualifier: None,
                name: ident.value.clone(),
                text: expr.to_string(),
            }),
            Expr::CompoundIdentifier(parts) if parts.len() == 2 => Some(Self {
                qualifier: Some(parts[0].value.clone()),
                name: parts[1].value.clone(),
                text: expr.to_string(),
            }),
            _ => None,
        }
    }

    /// The reference as it appeared in the query
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A column reference bound to one table and column
#[derive(Debug, Clone, Copy)]
pub struct ColumnReferenceMatch<'a> {
    pub table: &'a TableInfo,
    pub column: &'a ColumnSchema,
}

impl ColumnReferenceMatch<'_> {
    /// `_C<id>_`
    pub fn translated_column_name(&self) -> String {
        self.column.internal_name()
    }
}

/// Immutable mapping of the tables and columns of one query
#[derive(Debug, Clone)]
pub struct TableAndColumnMapper {
    tables: Vec<TableInfo>,
}

impl TableAndColumnMapper {
    pub fn new(select: &Select, resolver: &dyn SchemaResolver) -> Result<Self> {
        let mut tables = Vec::new();
        for (index, factor) in table_factors(select).into_iter().enumerate() {
            let (name, alias) = match factor {
                TableFactor::Table { name, alias, .. } => (name, alias),
                other => {
                    return Err(QueryError::InvalidArgument(format!(
                        "Unsupported table reference: {}",
                        other
                    )))
                }
            };
            let identity = TableIdentity::parse(&name.table_name())?;
            let schema = resolver.table_schema(&identity)?;
            if schema.is_empty() {
                return Err(QueryError::EmptyResult {
                    table_id: identity.to_string(),
                });
            }
            let kind = resolver.table_kind(&identity)?;
            tables.push(TableInfo {
                identity,
                index,
                original_name: name.to_string(),
                alias: alias.as_ref().map(|a| a.name.value.clone()),
                kind,
                schema,
            });
        }
        Ok(Self { tables })
    }

    /// Rebuild a mapper over previously resolved tables
    pub fn from_tables(tables: Vec<TableInfo>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn number_of_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn table_ids(&self) -> Vec<TableIdentity> {
        self.tables.iter().map(|t| t.identity).collect()
    }

    pub fn single_table_id(&self) -> Option<TableIdentity> {
        self.single_table().map(|t| t.identity)
    }

    pub fn single_table(&self) -> Option<&TableInfo> {
        match self.tables.as_slice() {
            [table] => Some(table),
            _ => None,
        }
    }

    pub fn union_of_schemas(&self) -> Vec<ColumnSchema> {
        self.tables
            .iter()
            .flat_map(|t| t.schema.iter().cloned())
            .collect()
    }

    /// Expand `SELECT *` into one quoted column per schema column
    pub fn build_select_all_columns(&self) -> Result<Vec<SelectItem>> {
        let multiple = self.tables.len() > 1;
        let columns: Vec<String> = self
            .tables
            .iter()
            .flat_map(|table| {
                let prefix = match (&table.alias, multiple) {
                    (Some(alias), _) => format!("{}.", alias),
                    (None, true) => format!("{}.", table.original_name),
                    (None, false) => String::new(),
                };
                table
                    .schema
                    .iter()
                    .map(move |c| format!("{}{}", prefix, quote_identifier(&c.name)))
            })
            .collect();
        parse_select_list(&columns.join(", "))
    }

    /// Bind a column reference. `Ok(None)` when no schema column matches.
    pub fn lookup_column_reference(
        &self,
        reference: &ColumnReference,
    ) -> Result<Option<ColumnReferenceMatch<'_>>> {
        if reference.qualifier.is_none() && self.tables.len() > 1 {
            return Err(QueryError::InvalidArgument(format!(
                "Expected a table name or table alias for column: {}",
                reference.text()
            )));
        }
        Ok(self.tables.iter().find_map(|table| {
            table
                .lookup_column(reference)
                .map(|column| ColumnReferenceMatch { table, column })
        }))
    }

    pub fn lookup_column_by_name(&self, name: &str) -> Result<Option<ColumnReferenceMatch<'_>>> {
        self.lookup_column_reference(&ColumnReference::unqualified(name))
    }

    pub fn lookup_table_name_correlation(&self, name: &ObjectName) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.is_match(name))
    }

    /// Select list and ordering that fetch the file ids of the query's rows
    pub fn build_select_and_order_by_file_column(
        &self,
        file_column_id: Option<i64>,
    ) -> Result<(Vec<SelectItem>, OrderBy)> {
        let table = self.require_single_table()?;
        let file_column = self.select_file_column_name(table, file_column_id)?;
        Ok((parse_select_list(&file_column)?, parse_order_by(&file_column)?))
    }

    /// Select list and ordering that fetch file ids and versions
    pub fn build_select_and_order_by_file_and_version_column(
        &self,
        file_column_id: Option<i64>,
        file_version_column_id: Option<i64>,
    ) -> Result<(Vec<SelectItem>, OrderBy)> {
        let table = self.require_single_table()?;
        let file_column = self.select_file_column_name(table, file_column_id)?;
        let version_column = match file_version_column_id {
            None => {
                if !table.kind.is_file_view_or_dataset() {
                    return Err(QueryError::InvalidArgument(format!(
                        "'{}' is not a file view or a dataset, the query.selectFileVersionColumn must be specified",
                        table.identity
                    )));
                }
                ROW_VERSION.to_string()
            }
            Some(id) => self
                .find_column(id, ColumnType::Integer)
                .ok_or_else(|| {
                    QueryError::InvalidArgument(
                        "The query.selectFileVersionColumn must be an INTEGER column that is part of the schema of the underlying table/view".to_string(),
                    )
                })?,
        };
        let selected = format!("{}, {}", file_column, quote_identifier(&version_column));
        Ok((parse_select_list(&selected)?, parse_order_by(&selected)?))
    }

    fn require_single_table(&self) -> Result<&TableInfo> {
        self.single_table().ok_or_else(|| {
            QueryError::InvalidArgument(JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT.to_string())
        })
    }

    fn select_file_column_name(&self, table: &TableInfo, file_column_id: Option<i64>) -> Result<String> {
        let name = match file_column_id {
            None => {
                if !table.kind.is_file_view_or_dataset() {
                    return Err(QueryError::InvalidArgument(format!(
                        "'{}' is not a file view or a dataset, the query.selectFileColumn must be specified",
                        table.identity
                    )));
                }
                ROW_ID.to_string()
            }
            Some(id) => self.find_column(id, ColumnType::EntityId).ok_or_else(|| {
                QueryError::InvalidArgument(
                    "The query.selectFileColumn must be an ENTITYID column that is part of the schema of the underlying table/view".to_string(),
                )
            })?,
        };
        Ok(quote_identifier(&name))
    }

    fn find_column(&self, id: i64, column_type: ColumnType) -> Option<String> {
        self.tables
            .iter()
            .flat_map(|t| t.schema.iter())
            .find(|c| c.id == id && c.column_type == column_type)
            .map(|c| c.name.clone())
    }
}
