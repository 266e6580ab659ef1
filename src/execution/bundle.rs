//! Query requests and result bundles

use super::services::ValueRow;
use super::token::QueryNextPageToken;
use crate::error::{QueryError, Result};
use crate::index::{ROW_ETAG, ROW_ID, ROW_VERSION};
use crate::planner::{FacetColumnRequest, FacetColumnResult, QueryFilter, SelectColumn, SortItem};
use crate::schema::ColumnSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const BUNDLE_MASK_QUERY_RESULTS: u64 = 0x1;
pub const BUNDLE_MASK_QUERY_COUNT: u64 = 0x2;
pub const BUNDLE_MASK_QUERY_SELECT_COLUMNS: u64 = 0x4;
pub const BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE: u64 = 0x8;
pub const BUNDLE_MASK_QUERY_COLUMN_MODELS: u64 = 0x10;
pub const BUNDLE_MASK_QUERY_FACETS: u64 = 0x20;
pub const BUNDLE_MASK_SUM_FILE_SIZES: u64 = 0x40;
pub const BUNDLE_MASK_LAST_UPDATED_ON: u64 = 0x80;

/// Which parts of a bundle to compute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub run_query: bool,
    pub run_count: bool,
    pub return_select_columns: bool,
    pub return_max_rows_per_page: bool,
    pub return_column_models: bool,
    pub return_facets: bool,
    pub run_sum_file_sizes: bool,
    pub return_last_updated_on: bool,
}

impl QueryOptions {
    pub fn from_mask(mask: u64) -> Self {
        Self {
            run_query: mask & BUNDLE_MASK_QUERY_RESULTS != 0,
            run_count: mask & BUNDLE_MASK_QUERY_COUNT != 0,
            return_select_columns: mask & BUNDLE_MASK_QUERY_SELECT_COLUMNS != 0,
            return_max_rows_per_page: mask & BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE != 0,
            return_column_models: mask & BUNDLE_MASK_QUERY_COLUMN_MODELS != 0,
            return_facets: mask & BUNDLE_MASK_QUERY_FACETS != 0,
            run_sum_file_sizes: mask & BUNDLE_MASK_SUM_FILE_SIZES != 0,
            return_last_updated_on: mask & BUNDLE_MASK_LAST_UPDATED_ON != 0,
        }
    }

    pub fn to_mask(&self) -> u64 {
        [
            (self.run_query, BUNDLE_MASK_QUERY_RESULTS),
            (self.run_count, BUNDLE_MASK_QUERY_COUNT),
            (self.return_select_columns, BUNDLE_MASK_QUERY_SELECT_COLUMNS),
            (self.return_max_rows_per_page, BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE),
            (self.return_column_models, BUNDLE_MASK_QUERY_COLUMN_MODELS),
            (self.return_facets, BUNDLE_MASK_QUERY_FACETS),
            (self.run_sum_file_sizes, BUNDLE_MASK_SUM_FILE_SIZES),
            (self.return_last_updated_on, BUNDLE_MASK_LAST_UPDATED_ON),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .fold(0, |mask, (_, bit)| mask | bit)
    }

    pub fn results_only() -> Self {
        Self {
            run_query: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_mask() == 0
    }

    /// True if any requested part reads the index
    pub fn touches_index(&self) -> bool {
        self.run_query
            || self.run_count
            || self.return_facets
            || self.run_sum_file_sizes
            || self.return_last_updated_on
    }
}

/// A query as submitted by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableQuery {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_filters: Vec<QueryFilter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selected_facets: Vec<FacetColumnRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    pub include_entity_etag: bool,
}

impl TableQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBundleRequest {
    pub query: TableQuery,
    /// Bundle parts to compute. Absent means query results only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_mask: Option<u64>,
    /// Capped by the configured per-request budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes_per_page: Option<u64>,
}

impl QueryBundleRequest {
    pub fn options(&self) -> QueryOptions {
        self.part_mask
            .map(QueryOptions::from_mask)
            .unwrap_or_else(QueryOptions::results_only)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub values: Vec<Option<String>>,
}

impl Row {
    /// Split the leading system columns off a raw result row
    pub fn from_values(row_columns: &[String], mut values: ValueRow) -> Result<Row> {
        if values.len() < row_columns.len() {
            return Err(QueryError::Execution(format!(
                "Expected at least {} columns but the row has {}",
                row_columns.len(),
                values.len()
            )));
        }
        let user_values = values.split_off(row_columns.len());
        let mut row = Row {
            values: user_values,
            ..Row::default()
        };
        for (name, value) in row_columns.iter().zip(values) {
            match name.as_str() {
                ROW_ID => row.row_id = parse_long(name, value)?,
                ROW_VERSION => row.version_number = parse_long(name, value)?,
                ROW_ETAG => row.etag = value,
                _ => {}
            }
        }
        Ok(row)
    }
}

fn parse_long(column: &str, value: Option<String>) -> Result<Option<i64>> {
    value
        .map(|v| {
            v.parse().map_err(|_| {
                QueryError::Execution(format!("{} is not a number: {}", column, v))
            })
        })
        .transpose()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub headers: Vec<SelectColumn>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn empty(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query_results: RowSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<QueryNextPageToken>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumFileSizes {
    pub sum_file_size_bytes: i64,
    /// More files matched than were summed
    pub greater_than: bool,
}

/// Every part is present only when requested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_result: Option<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_columns: Option<Vec<SelectColumn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows_per_page: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_models: Option<Vec<ColumnSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<FacetColumnResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_file_sizes: Option<SumFileSizes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_on: Option<DateTime<Utc>>,
}

impl QueryResultBundle {
    /// Neutral values for every requested part of a table without columns
    pub fn empty(table_id: &str, options: &QueryOptions) -> Self {
        Self {
            query_result: options.run_query.then(|| QueryResult {
                query_results: RowSet::empty(table_id),
                next_page_token: None,
            }),
            query_count: options.run_count.then_some(0),
            select_columns: options.return_select_columns.then(Vec::new),
            max_rows_per_page: options.return_max_rows_per_page.then_some(1),
            column_models: options.return_column_models.then(Vec::new),
            facets: options.return_facets.then(Vec::new),
            sum_file_sizes: options.run_sum_file_sizes.then(SumFileSizes::default),
            last_updated_on: None,
        }
    }
}
