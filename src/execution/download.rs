//! Query downloads
//!
//! A download writes every row of a query, unpaged, to a [`RowWriter`]:
//! an optional header line, then one line per row. Row id and version lead
//! each line unless turned off; the entity etag follows them for views.

use super::bundle::{Row, TableQuery};
use crate::error::Result;
use crate::index::{ROW_ETAG, ROW_ID, ROW_VERSION};
use crate::planner::{FacetColumnRequest, QueryFilter, SelectColumn, SortItem};
use serde::{Deserialize, Serialize};

/// A request to download all rows of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadRequest {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_filters: Vec<QueryFilter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selected_facets: Vec<FacetColumnRequest>,
    pub include_row_id_and_row_version: bool,
    pub write_header: bool,
    /// Only honored for views, and only with row id and version
    pub include_entity_etag: bool,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            sql: String::new(),
            sort: Vec::new(),
            additional_filters: Vec::new(),
            selected_facets: Vec::new(),
            include_row_id_and_row_version: true,
            write_header: true,
            include_entity_etag: false,
        }
    }
}

impl DownloadRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// The query to run, without page bounds
    pub(crate) fn to_query(&self) -> TableQuery {
        TableQuery {
            sql: self.sql.clone(),
            sort: self.sort.clone(),
            additional_filters: self.additional_filters.clone(),
            selected_facets: self.selected_facets.clone(),
            offset: None,
            limit: None,
            include_entity_etag: self.include_row_id_and_row_version && self.include_entity_etag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    pub table_id: String,
    /// Last change etag of the table when the download started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub headers: Vec<SelectColumn>,
    pub rows_written: u64,
}

/// Destination of downloaded lines
pub trait RowWriter {
    fn write_row(&mut self, line: &[String]) -> Result<()>;
}

impl RowWriter for Vec<Vec<String>> {
    fn write_row(&mut self, line: &[String]) -> Result<()> {
        self.push(line.to_vec());
        Ok(())
    }
}

impl<W: std::io::Write> RowWriter for csv::Writer<W> {
    fn write_row(&mut self, line: &[String]) -> Result<()> {
        self.write_record(line)?;
        Ok(())
    }
}

/// Header line: system columns, then the query's select columns
pub(crate) fn header_line(row_columns: &[String], headers: &[SelectColumn]) -> Vec<String> {
    row_columns
        .iter()
        .cloned()
        .chain(headers.iter().map(|h| h.name.clone()))
        .collect()
}

/// One line per row. NULL cells are written empty.
pub(crate) fn row_line(row_columns: &[String], row: &Row) -> Vec<String> {
    let system = row_columns.iter().map(|name| match name.as_str() {
        ROW_ID => row.row_id.map(|id| id.to_string()).unwrap_or_default(),
        ROW_VERSION => row.version_number.map(|v| v.to_string()).unwrap_or_default(),
        ROW_ETAG => row.etag.clone().unwrap_or_default(),
        _ => String::new(),
    });
    system
        .chain(row.values.iter().map(|v| v.clone().unwrap_or_default()))
        .collect()
}
