//! Query compiler
//!
//! Builds a [`SqlQuery`] from query text: resolves the table, expands
//! `SELECT *`, merges caller sort, filters and facet selections, checks
//! feature gating and translates the result into backing-index SQL.
//! Row-level security is layered on with [`SqlQuery::with_row_filter`].

use super::facet::{FacetColumn, FacetColumnRequest, FacetColumnResult, FacetModel};
use super::filters::{filters_to_expr, sort_to_order_by, QueryFilter, SortItem};
use super::mapper::{ColumnReference, TableAndColumnMapper, TableInfo, JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT};
use super::security::{apply_row_filter, RowFilter};
use super::translator::{translate_query, Parameters, TEXT_MATCHES};
use crate::error::{QueryError, Result};
use crate::execution::{PrincipalId, RowSet, TableIndex};
use crate::index::{IndexDescription, IndexDescriptionProvider, SqlContext, ROW_ID, ROW_VERSION};
use crate::parser::{
    and, and_all, contains_function, contains_subquery, function_args, function_name, group_by_exprs, is_distinct,
    literal_u64, nested, number, parse_internal_expr, parse_query, parse_select_list,
    projection_has_aggregate, select_of, select_of_mut, Expr, GroupByExpr, Offset, OffsetRows,
    Query, Select, SelectItem,
};
use crate::schema::{ColumnSchema, ColumnType, SchemaResolver, TableIdentity};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One column of the query's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectColumn {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<ColumnType>,
    /// Schema column id, when the output is a plain column reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

pub const SUBQUERY_NOT_SUPPORTED: &str =
    "Subqueries and WITH clauses are not supported in table queries";

/// How to count the rows of a query
#[derive(Debug, Clone, PartialEq)]
pub enum CountQuery {
    /// Known without touching the index
    Constant(i64),
    Sql { sql: String, parameters: Parameters },
}

/// Builder for [`SqlQuery`]
pub struct SqlQueryBuilder<'a> {
    sql: &'a str,
    resolver: &'a dyn SchemaResolver,
    descriptions: Option<&'a dyn IndexDescriptionProvider>,
    table_index: Option<&'a dyn TableIndex>,
    caller: PrincipalId,
    sort: Vec<SortItem>,
    additional_filters: Vec<QueryFilter>,
    selected_facets: Vec<FacetColumnRequest>,
    override_offset: Option<u64>,
    override_limit: Option<u64>,
    max_bytes_per_page: Option<u64>,
    include_entity_etag: bool,
}

impl<'a> SqlQueryBuilder<'a> {
    pub fn new(sql: &'a str, resolver: &'a dyn SchemaResolver) -> Self {
        Self {
            sql,
            resolver,
            descriptions: None,
            table_index: None,
            caller: PrincipalId::default(),
            sort: Vec::new(),
            additional_filters: Vec::new(),
            selected_facets: Vec::new(),
            override_offset: None,
            override_limit: None,
            max_bytes_per_page: None,
            include_entity_etag: false,
        }
    }

    pub fn caller(mut self, caller: PrincipalId) -> Self {
        self.caller = caller;
        self
    }

    /// Required
    pub fn index_descriptions(mut self, descriptions: &'a dyn IndexDescriptionProvider) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    /// Consulted for full text search. Without an index, search is disabled.
    pub fn table_index(mut self, table_index: &'a dyn TableIndex) -> Self {
        self.table_index = Some(table_index);
        self
    }

    /// Replaces any ORDER BY in the query text
    pub fn sort(mut self, sort: Vec<SortItem>) -> Self {
        self.sort = sort;
        self
    }

    pub fn additional_filters(mut self, filters: Vec<QueryFilter>) -> Self {
        self.additional_filters = filters;
        self
    }

    pub fn selected_facets(mut self, facets: Vec<FacetColumnRequest>) -> Self {
        self.selected_facets = facets;
        self
    }

    pub fn override_offset(mut self, offset: Option<u64>) -> Self {
        self.override_offset = offset;
        self
    }

    pub fn override_limit(mut self, limit: Option<u64>) -> Self {
        self.override_limit = limit;
        self
    }

    /// Byte budget of one page. Without it pages are not capped.
    pub fn max_bytes_per_page(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes_per_page = max_bytes;
        self
    }

    pub fn include_entity_etag(mut self, include: bool) -> Self {
        self.include_entity_etag = include;
        self
    }

    pub fn build(self) -> Result<SqlQuery> {
        let descriptions = self.descriptions.ok_or_else(|| {
            QueryError::InvalidArgument("An index description provider is required".to_string())
        })?;
        let mut model = parse_query(self.sql)?;
        let text_limit = bound(model.limit.as_ref(), "LIMIT")?;
        let text_offset = bound(model.offset.as_ref().map(|o| &o.value), "OFFSET")?;

        let mapper = TableAndColumnMapper::new(select_of(&model)?, self.resolver)?;
        let table_id = mapper.single_table_id().ok_or_else(|| {
            QueryError::InvalidArgument(JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT.to_string())
        })?;
        let index_description = descriptions.index_description(&table_id)?;

        let select = select_of_mut(&mut model)?;
        if matches!(select.projection.as_slice(), [SelectItem::Wildcard(_)]) {
            select.projection = mapper.build_select_all_columns()?;
        }
        if let Some(filter) = filters_to_expr(&self.additional_filters)? {
            select.selection = Some(and_where(select.selection.take(), filter));
        }
        let base_where = select.selection.clone();
        let facets = FacetModel::new(&self.selected_facets, &mapper.union_of_schemas())?;
        if let Some(filter) = facets.filter_expr(None)? {
            select.selection = Some(and_where(select.selection.take(), filter));
        }
        if contains_function(select, TEXT_MATCHES) && !self.is_search_enabled(&table_id)? {
            return Err(QueryError::InvalidArgument(format!(
                "Invalid use of {}. Full text search is not enabled on table {}.",
                TEXT_MATCHES, table_id
            )));
        }
        let select_columns = build_select_columns(&mapper, select)?;
        let is_aggregate = is_aggregate_select(select);
        if let Some(order_by) = sort_to_order_by(&self.sort)? {
            model.order_by = Some(order_by);
        }
        if contains_subquery(&model) {
            return Err(QueryError::InvalidArgument(SUBQUERY_NOT_SUPPORTED.to_string()));
        }

        let row_bytes = select_row_bytes(&select_columns, &mapper.union_of_schemas());
        let max_rows_per_page = self
            .max_bytes_per_page
            .and_then(|budget| (row_bytes > 0).then(|| (budget / row_bytes).max(1)));
        let override_limit = checked_override(self.override_limit, "limit")?;
        let override_offset = checked_override(self.override_offset, "offset")?;
        let limit = match (override_limit.or(text_limit), max_rows_per_page) {
            (Some(limit), Some(max_rows)) => Some(limit.min(max_rows)),
            (limit, max_rows) => limit.or(max_rows),
        };
        let offset = override_offset.or(text_offset);
        set_bounds(&mut model, limit, offset);

        SqlQuery::new(QuerySource {
            model,
            row_filter: None,
            tables: mapper.tables().to_vec(),
            index_description,
            select_columns,
            is_aggregate,
            text_limit,
            text_offset,
            limit,
            offset,
            max_rows_per_page,
            include_row_columns: true,
            include_etag: self.include_entity_etag,
            base_where,
            facets,
            caller: self.caller,
        })
    }

    fn is_search_enabled(&self, table_id: &TableIdentity) -> Result<bool> {
        match self.table_index {
            Some(index) => index.is_search_enabled(table_id),
            None => Ok(false),
        }
    }
}

/// Everything a query is compiled from
#[derive(Debug, Clone)]
struct QuerySource {
    /// Public model with filters, facets, sort and bounds merged, before security
    model: Query,
    row_filter: Option<RowFilter>,
    tables: Vec<TableInfo>,
    index_description: IndexDescription,
    select_columns: Vec<SelectColumn>,
    is_aggregate: bool,
    text_limit: Option<u64>,
    text_offset: Option<u64>,
    limit: Option<u64>,
    offset: Option<u64>,
    max_rows_per_page: Option<u64>,
    include_row_columns: bool,
    include_etag: bool,
    /// WHERE with caller filters but without facet selections
    base_where: Option<Expr>,
    facets: FacetModel,
    caller: PrincipalId,
}

#[derive(Debug, Clone)]
struct Translation {
    translated: Query,
    output_sql: String,
    parameters: Parameters,
    row_columns: Vec<String>,
}

impl QuerySource {
    fn translate(&self) -> Result<Translation> {
        let secured = match &self.row_filter {
            Some(filter) => apply_row_filter(&self.model, filter)?,
            None => self.model.clone(),
        };
        let mapper = TableAndColumnMapper::from_tables(self.tables.clone());
        let (mut translated, parameters) = translate_query(&mapper, &secured)?;

        let row_columns = if self.include_row_columns {
            self.index_description.column_names_to_add_to_select(
                SqlContext::Query,
                self.include_etag,
                self.is_aggregate,
            )?
        } else {
            Vec::new()
        };
        if !row_columns.is_empty() {
            let select = select_of_mut(&mut translated)?;
            let mut projection = parse_select_list(&row_columns.join(", "))?;
            projection.append(&mut select.projection);
            select.projection = projection;
        }

        let output_sql = translated.to_string();
        debug!(sql = %output_sql, parameters = parameters.len(), "Compiled query");
        Ok(Translation {
            translated,
            output_sql,
            parameters,
            row_columns,
        })
    }
}

/// A compiled query: backing-index SQL, its bind parameters and everything
/// needed to derive count, facet and file size queries from it.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    source: QuerySource,
    translation: Translation,
}

impl SqlQuery {
    fn new(source: QuerySource) -> Result<Self> {
        let translation = source.translate()?;
        Ok(Self {
            source,
            translation,
        })
    }

    /// Recompile with the given row-level restriction
    pub fn with_row_filter(&self, row_filter: Option<RowFilter>) -> Result<SqlQuery> {
        let mut source = self.source.clone();
        source.row_filter = row_filter;
        SqlQuery::new(source)
    }

    /// Backing-index SQL
    pub fn output_sql(&self) -> &str {
        &self.translation.output_sql
    }

    pub fn parameters(&self) -> &Parameters {
        &self.translation.parameters
    }

    pub fn translated(&self) -> &Query {
        &self.translation.translated
    }

    /// Public model, before row-level security
    pub fn model(&self) -> &Query {
        &self.source.model
    }

    pub fn row_filter(&self) -> Option<&RowFilter> {
        self.source.row_filter.as_ref()
    }

    pub fn table_id(&self) -> &TableIdentity {
        self.source.index_description.table_id()
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        self.source.tables.first().map(TableInfo::schema).unwrap_or(&[])
    }

    pub fn index_description(&self) -> &IndexDescription {
        &self.source.index_description
    }

    pub fn select_columns(&self) -> &[SelectColumn] {
        &self.source.select_columns
    }

    pub fn is_aggregate(&self) -> bool {
        self.source.is_aggregate
    }

    /// Effective page bounds
    pub fn limit(&self) -> Option<u64> {
        self.source.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.source.offset
    }

    /// Bounds written in the query text
    pub fn text_limit(&self) -> Option<u64> {
        self.source.text_limit
    }

    pub fn text_offset(&self) -> Option<u64> {
        self.source.text_offset
    }

    pub fn max_rows_per_page(&self) -> Option<u64> {
        self.source.max_rows_per_page
    }

    pub fn includes_etag(&self) -> bool {
        self.source.include_etag
    }

    /// System columns prepended to each output row
    pub fn row_columns(&self) -> &[String] {
        &self.translation.row_columns
    }

    pub fn facets(&self) -> &FacetModel {
        &self.source.facets
    }

    pub fn caller(&self) -> PrincipalId {
        self.source.caller
    }

    /// How to count all rows of the query, ignoring page bounds
    pub fn count_query(&self) -> Result<CountQuery> {
        let select = select_of(&self.translation.translated)?;
        let group_by = group_by_exprs(select);
        let distinct = is_distinct(select);
        if self.source.is_aggregate && group_by.is_empty() && !distinct {
            return Ok(CountQuery::Constant(1));
        }

        let count_sql = if !group_by.is_empty() {
            let exprs: Vec<String> = group_by
                .iter()
                .map(|e| resolve_alias(e, select).to_string())
                .collect();
            format!("COUNT(DISTINCT {})", exprs.join(", "))
        } else if distinct {
            let exprs: Vec<String> = select
                .projection
                .iter()
                .filter_map(|item| match item {
                    SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                        Some(expr.to_string())
                    }
                    _ => None,
                })
                .collect();
            format!("COUNT(DISTINCT {})", exprs.join(", "))
        } else {
            "COUNT(*)".to_string()
        };
        let count_expr = parse_internal_expr(&count_sql)?;

        let mut count = self.translation.translated.clone();
        let select = select_of_mut(&mut count)?;
        select.projection = vec![SelectItem::UnnamedExpr(count_expr)];
        select.distinct = None;
        select.group_by = GroupByExpr::Expressions(Vec::new(), Vec::new());
        select.having = None;
        count.order_by = None;
        count.limit = None;
        count.offset = None;

        Ok(CountQuery::Sql {
            sql: count.to_string(),
            parameters: self.translation.parameters.clone(),
        })
    }

    /// Apply the query text's LIMIT and OFFSET to a count of all rows
    pub fn limit_count(&self, true_count: i64) -> i64 {
        match self.source.text_limit {
            Some(limit) => {
                let true_count = u64::try_from(true_count).unwrap_or(0);
                let offset = self.source.text_offset.unwrap_or(0);
                let count = true_count.saturating_sub(offset).min(limit);
                i64::try_from(count).unwrap_or(i64::MAX)
            }
            None => true_count,
        }
    }

    /// One query per faceted column. Each sees every filter except its own
    /// column's selection.
    pub fn facet_queries(&self, max_values: u64) -> Result<Vec<FacetTransformer>> {
        let table = self.table_text()?;
        self.source
            .facets
            .columns()
            .iter()
            .map(|column| {
                let others = self.source.facets.filter_expr(Some(column.name()))?;
                let where_clause = and_all(self.source.base_where.clone().into_iter().chain(others));
                let sql = column.facet_sql(&table, where_clause.as_ref(), max_values);
                Ok(FacetTransformer {
                    column: column.clone(),
                    query: self.derive_query(parse_query(&sql)?)?,
                })
            })
            .collect()
    }

    /// Row ids and versions of at most `max_rows + 1` matching files. None
    /// unless the table holds files and the query is not aggregate.
    pub fn file_sizes_query(&self, max_rows: u64) -> Result<Option<SqlQuery>> {
        if self.source.is_aggregate || !self.source.index_description.table_kind().is_file_view_or_dataset() {
            return Ok(None);
        }
        let where_sql = select_of(&self.source.model)?
            .selection
            .as_ref()
            .map(|w| format!(" WHERE {}", w))
            .unwrap_or_default();
        let sql = format!(
            "SELECT {}, {} FROM {}{} LIMIT {}",
            ROW_ID,
            ROW_VERSION,
            self.table_text()?,
            where_sql,
            max_rows.saturating_add(1)
        );
        self.derive_query(parse_query(&sql)?).map(Some)
    }

    /// A query over the same table, compiled under the same row filter
    fn derive_query(&self, model: Query) -> Result<SqlQuery> {
        let mapper = TableAndColumnMapper::from_tables(self.source.tables.clone());
        let select = select_of(&model)?;
        let select_columns = build_select_columns(&mapper, select)?;
        let is_aggregate = is_aggregate_select(select);
        let base_where = select.selection.clone();
        let limit = bound(model.limit.as_ref(), "LIMIT")?;
        let offset = bound(model.offset.as_ref().map(|o| &o.value), "OFFSET")?;
        SqlQuery::new(QuerySource {
            model,
            row_filter: self.source.row_filter.clone(),
            tables: self.source.tables.clone(),
            index_description: self.source.index_description.clone(),
            select_columns,
            is_aggregate,
            text_limit: limit,
            text_offset: offset,
            limit,
            offset,
            max_rows_per_page: None,
            include_row_columns: false,
            include_etag: false,
            base_where,
            facets: FacetModel::default(),
            caller: self.source.caller,
        })
    }

    /// FROM clause of the public model, alias included
    fn table_text(&self) -> Result<String> {
        select_of(&self.source.model)?
            .from
            .first()
            .map(|t| t.relation.to_string())
            .ok_or_else(|| QueryError::Internal("Query has no FROM clause".to_string()))
    }
}

/// A facet query with the column that turns its rows into a result
#[derive(Debug, Clone)]
pub struct FacetTransformer {
    column: FacetColumn,
    query: SqlQuery,
}

impl FacetTransformer {
    pub fn column_name(&self) -> &str {
        self.column.name()
    }

    pub fn query(&self) -> &SqlQuery {
        &self.query
    }

    pub fn translate(&self, rows: &RowSet) -> Result<FacetColumnResult> {
        let values: Vec<Vec<Option<String>>> = rows.rows.iter().map(|r| r.values.clone()).collect();
        self.column.translate_results(&values)
    }
}

/// GROUP BY, DISTINCT or an aggregate function in the select list
fn is_aggregate_select(select: &Select) -> bool {
    !group_by_exprs(select).is_empty() || is_distinct(select) || projection_has_aggregate(select)
}

fn and_where(existing: Option<Expr>, extra: Expr) -> Expr {
    match existing {
        Some(existing) => and(nested(existing), extra),
        None => extra,
    }
}

/// LIMIT and OFFSET literal. Values past `i64::MAX` cannot be bound by the
/// backing index.
fn bound(expr: Option<&Expr>, clause: &str) -> Result<Option<u64>> {
    expr.map(|e| {
        literal_u64(e)
            .filter(|value| i64::try_from(*value).is_ok())
            .ok_or_else(|| {
                QueryError::InvalidArgument(format!(
                    "{} must be an integer between 0 and {}: {}",
                    clause,
                    i64::MAX,
                    e
                ))
            })
    })
    .transpose()
}

fn checked_override(value: Option<u64>, name: &str) -> Result<Option<u64>> {
    match value {
        Some(v) if i64::try_from(v).is_err() => Err(QueryError::InvalidArgument(format!(
            "Query {} must be at most {}: {}",
            name,
            i64::MAX,
            v
        ))),
        other => Ok(other),
    }
}

fn set_bounds(query: &mut Query, limit: Option<u64>, offset: Option<u64>) {
    query.limit = limit.map(number);
    query.offset = offset.map(|value| Offset {
        value: number(value),
        rows: OffsetRows::None,
    });
}

/// An alias in GROUP BY stands for its select expression; the backing
/// engine cannot see aliases inside COUNT(DISTINCT ...).
fn resolve_alias<'s>(expr: &'s Expr, select: &'s Select) -> &'s Expr {
    if let Expr::Identifier(ident) = expr {
        for item in &select.projection {
            if let SelectItem::ExprWithAlias { expr: aliased, alias } = item {
                if alias.value == ident.value {
                    return aliased;
                }
            }
        }
    }
    expr
}

fn build_select_columns(mapper: &TableAndColumnMapper, select: &Select) -> Result<Vec<SelectColumn>> {
    select
        .projection
        .iter()
        .map(|item| match item {
            SelectItem::UnnamedExpr(expr) => {
                let name = ColumnReference::from_expr(expr)
                    .map(|r| r.name)
                    .unwrap_or_else(|| expr.to_string());
                select_column(mapper, name, expr)
            }
            SelectItem::ExprWithAlias { expr, alias } => select_column(mapper, alias.value.clone(), expr),
            other => Err(QueryError::InvalidArgument(format!(
                "Unsupported select item: {}",
                other
            ))),
        })
        .collect()
}

fn select_column(mapper: &TableAndColumnMapper, name: String, expr: &Expr) -> Result<SelectColumn> {
    if let Some(reference) = ColumnReference::from_expr(expr) {
        let found = mapper.lookup_column_reference(&reference)?;
        return Ok(SelectColumn {
            name,
            column_type: found.map(|m| m.column.column_type),
            id: found.map(|m| m.column.id),
        });
    }
    Ok(SelectColumn {
        name,
        column_type: infer_type(mapper, expr)?,
        id: None,
    })
}

fn infer_type(mapper: &TableAndColumnMapper, expr: &Expr) -> Result<Option<ColumnType>> {
    match expr {
        Expr::Nested(inner) => infer_type(mapper, inner),
        Expr::Function(function) => Ok(match function_name(function).as_str() {
            "COUNT" => Some(ColumnType::Integer),
            "AVG" | "STD" | "STDDEV" | "STDDEV_POP" | "STDDEV_SAMP" | "VARIANCE" | "VAR_POP"
            | "VAR_SAMP" => Some(ColumnType::Double),
            "GROUP_CONCAT" => Some(ColumnType::String),
            "SUM" | "MIN" | "MAX" => match function_args(function).as_slice() {
                [arg] => match ColumnReference::from_expr(arg) {
                    Some(reference) => mapper
                        .lookup_column_reference(&reference)?
                        .map(|m| m.column.column_type),
                    None => None,
                },
                _ => None,
            },
            _ => None,
        }),
        _ => Ok(None),
    }
}

/// Upper bound of one output row in bytes
fn select_row_bytes(select_columns: &[SelectColumn], schema: &[ColumnSchema]) -> u64 {
    select_columns
        .iter()
        .map(|select| match select.id.and_then(|id| schema.iter().find(|c| c.id == id)) {
            Some(column) => column.max_bytes(),
            None => select
                .column_type
                .unwrap_or(ColumnType::String)
                .max_bytes(None, None),
        })
        .sum()
}
