//! Query bundle assembly
//!
//! [`TableQueryManager`] is the entry point for running table queries. A
//! request runs through preflight (compile, authorize, secure), then computes
//! each requested bundle part against the backing index while holding a
//! non-exclusive table lock.

use super::bundle::{
    QueryBundleRequest, QueryOptions, QueryResult, QueryResultBundle, SumFileSizes, TableQuery,
    BUNDLE_MASK_QUERY_RESULTS,
};
use super::download::{header_line, row_line, DownloadRequest, DownloadResult, RowWriter};
use super::lock::{with_non_exclusive_lock, TableLockManager};
use super::progress::ProgressContext;
use super::services::{Authorizer, PrincipalId, TableIndex};
use super::status::{validate_table_is_available, TableStatus, TableStatusProvider};
use super::stream::RowStream;
use super::token::QueryNextPageToken;
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::index::{
    IndexDescription, IndexDescriptionProvider, IndexDescriptionResolver,
    MaterializedViewDependencyManager, SourceTableChanges, SourceTableStore,
};
use crate::planner::{build_row_filter, CountQuery, FacetColumnResult, SqlQuery, SqlQueryBuilder};
use crate::schema::{ObjectType, SchemaResolver, TableIdentity};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Collaborators a [`TableQueryManager`] runs against
#[derive(Clone)]
pub struct QueryServices {
    pub schemas: Arc<dyn SchemaResolver>,
    pub sources: Arc<dyn SourceTableStore>,
    pub index: Arc<dyn TableIndex>,
    pub authorizer: Arc<dyn Authorizer>,
    pub status: Arc<dyn TableStatusProvider>,
    pub locks: Arc<dyn TableLockManager>,
}

pub struct TableQueryManager {
    services: QueryServices,
    config: EngineConfig,
}

impl TableQueryManager {
    pub fn new(services: QueryServices, config: EngineConfig) -> Self {
        Self { services, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn descriptions(&self) -> IndexDescriptionResolver<'_> {
        IndexDescriptionResolver::new(self.services.schemas.as_ref(), self.services.sources.as_ref())
    }

    /// Index description of a table, view or materialized view
    pub fn index_description(&self, table_id: &TableIdentity) -> Result<IndexDescription> {
        self.descriptions().index_description(table_id)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for a table's index
    pub fn create_or_update_index_sql(&self, table_id: &TableIdentity) -> Result<String> {
        Ok(self.index_description(table_id)?.create_or_update_index_sql())
    }

    /// Record the source tables of a materialized view
    pub fn register_source_tables(
        &self,
        view_id: &TableIdentity,
        defining_sql: &str,
    ) -> Result<SourceTableChanges> {
        MaterializedViewDependencyManager::new(self.services.sources.as_ref())
            .register_source_tables(view_id, defining_sql)
    }

    /// Compile, authorize and secure a query.
    ///
    /// Fails with `EmptyResult` when the table has no columns.
    pub fn query_preflight(
        &self,
        ctx: &ProgressContext,
        caller: PrincipalId,
        query: &TableQuery,
        max_bytes_per_page: Option<u64>,
    ) -> Result<SqlQuery> {
        let budget = max_bytes_per_page
            .map_or(self.config.max_bytes_per_request, |b| b.min(self.config.max_bytes_per_request));
        self.preflight(ctx, caller, query, Some(budget))
    }

    /// Preflight with an optional page budget. Without one the query is
    /// not paged.
    fn preflight(
        &self,
        ctx: &ProgressContext,
        caller: PrincipalId,
        query: &TableQuery,
        budget: Option<u64>,
    ) -> Result<SqlQuery> {
        ctx.progress()?;
        let descriptions = self.descriptions();
        let compiled = SqlQueryBuilder::new(&query.sql, self.services.schemas.as_ref())
            .caller(caller)
            .index_descriptions(&descriptions)
            .table_index(self.services.index.as_ref())
            .sort(query.sort.clone())
            .additional_filters(query.additional_filters.clone())
            .selected_facets(query.selected_facets.clone())
            .override_offset(query.offset)
            .override_limit(query.limit)
            .max_bytes_per_page(budget)
            .include_entity_etag(query.include_entity_etag)
            .build()?;

        self.services
            .authorizer
            .can_read_table(caller, compiled.index_description())?;
        ctx.progress()?;

        match build_row_filter(
            ctx,
            caller,
            compiled.index_description(),
            self.services.index.as_ref(),
            self.services.authorizer.as_ref(),
        )? {
            Some(filter) => compiled.with_row_filter(Some(filter)),
            None => Ok(compiled),
        }
    }

    /// Run a query and return the requested bundle parts
    pub fn query_bundle(
        &self,
        ctx: &ProgressContext,
        caller: PrincipalId,
        request: &QueryBundleRequest,
    ) -> Result<QueryResultBundle> {
        let options = request.options();
        if options.is_empty() {
            return Ok(QueryResultBundle::default());
        }
        match self.query_preflight(ctx, caller, &request.query, request.max_bytes_per_page) {
            Ok(query) => {
                self.query_single_page(ctx, &query, &request.query, request.max_bytes_per_page, &options)
            }
            Err(QueryError::EmptyResult { table_id }) => {
                debug!(table_id = %table_id, "Empty schema, returning empty bundle");
                Ok(QueryResultBundle::empty(&table_id, &options))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the page a token points to
    pub fn query_next_page(
        &self,
        ctx: &ProgressContext,
        caller: PrincipalId,
        token: &QueryNextPageToken,
    ) -> Result<QueryResult> {
        let (query, max_bytes_per_page) = token.decode()?;
        let request = QueryBundleRequest {
            query,
            part_mask: Some(BUNDLE_MASK_QUERY_RESULTS),
            max_bytes_per_page,
        };
        self.query_bundle(ctx, caller, &request)?
            .query_result
            .ok_or_else(|| QueryError::Internal("Next page produced no results".to_string()))
    }

    /// Stream the rows of a preflighted query. With consistent reads the
    /// stream holds the table's non-exclusive lock until it is exhausted or
    /// dropped.
    pub fn stream_rows<'a>(
        &'a self,
        ctx: &'a ProgressContext,
        query: &'a SqlQuery,
    ) -> Result<RowStream<'a>> {
        let lock = if self.config.consistent_reads {
            Some(self.services.locks.acquire_shared(query.table_id())?)
        } else {
            None
        };
        let status = validate_table_is_available(self.services.status.as_ref(), query.table_id())?;
        let values = self.services.index.query_as_stream(ctx, query)?;
        Ok(RowStream::new(values, query.row_columns(), ctx, status, lock))
    }

    /// Write every row of a query to `writer`, holding the table's
    /// non-exclusive lock for the whole download.
    ///
    /// Unlike [`Self::query_bundle`], a table without columns is an invalid
    /// argument rather than an empty result.
    pub fn run_query_download_as_stream(
        &self,
        ctx: &ProgressContext,
        caller: PrincipalId,
        request: &DownloadRequest,
        writer: &mut dyn RowWriter,
    ) -> Result<DownloadResult> {
        let start = Instant::now();
        let query = match self.preflight(ctx, caller, &request.to_query(), None) {
            Err(QueryError::EmptyResult { table_id }) => {
                return Err(QueryError::InvalidArgument(format!(
                    "Table {} has no columns to download",
                    table_id
                )))
            }
            other => other?,
        };
        let row_columns: &[String] = if request.include_row_id_and_row_version {
            query.row_columns()
        } else {
            &[]
        };

        let mut stream = self.stream_rows(ctx, &query)?;
        let etag = stream.status().last_change_etag.clone();
        if request.write_header {
            writer.write_row(&header_line(row_columns, query.select_columns()))?;
        }
        let mut rows_written = 0u64;
        for row in stream.by_ref() {
            writer.write_row(&row_line(row_columns, &row?))?;
            rows_written += 1;
        }
        drop(stream);

        info!(
            table_id = %query.table_id(),
            rows = rows_written,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Download complete"
        );
        Ok(DownloadResult {
            table_id: query.table_id().to_string(),
            etag,
            headers: query.select_columns().to_vec(),
            rows_written,
        })
    }

    fn query_single_page(
        &self,
        ctx: &ProgressContext,
        query: &SqlQuery,
        request: &TableQuery,
        max_bytes_per_page: Option<u64>,
        options: &QueryOptions,
    ) -> Result<QueryResultBundle> {
        let start = Instant::now();
        debug!(
            table_id = %query.table_id(),
            part_mask = options.to_mask(),
            "Running query bundle"
        );

        let bundle = if !options.touches_index() {
            self.assemble(ctx, query, request, max_bytes_per_page, options, None)?
        } else if self.config.consistent_reads {
            with_non_exclusive_lock(self.services.locks.as_ref(), query.table_id(), || {
                let status = validate_table_is_available(self.services.status.as_ref(), query.table_id())?;
                self.assemble(ctx, query, request, max_bytes_per_page, options, Some(status))
            })?
        } else {
            let status = validate_table_is_available(self.services.status.as_ref(), query.table_id())?;
            self.assemble(ctx, query, request, max_bytes_per_page, options, Some(status))?
        };

        info!(
            table_id = %query.table_id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query bundle complete"
        );
        Ok(bundle)
    }

    fn assemble(
        &self,
        ctx: &ProgressContext,
        query: &SqlQuery,
        request: &TableQuery,
        max_bytes_per_page: Option<u64>,
        options: &QueryOptions,
        status: Option<TableStatus>,
    ) -> Result<QueryResultBundle> {
        let mut bundle = QueryResultBundle::default();
        if options.run_query {
            let rows = self.services.index.query(ctx, query)?;
            let next_page_token =
                next_page_token(query, request, max_bytes_per_page, rows.rows.len() as u64)?;
            bundle.query_result = Some(QueryResult {
                query_results: rows,
                next_page_token,
            });
        }
        if options.run_count {
            ctx.progress()?;
            bundle.query_count = Some(self.run_count_query(query)?);
        }
        if options.return_select_columns {
            bundle.select_columns = Some(query.select_columns().to_vec());
        }
        if options.return_max_rows_per_page {
            bundle.max_rows_per_page = query.max_rows_per_page();
        }
        if options.return_column_models {
            bundle.column_models = Some(query.schema().to_vec());
        }
        if options.return_facets {
            bundle.facets = Some(self.run_facet_queries(ctx, query)?);
        }
        if options.run_sum_file_sizes {
            ctx.progress()?;
            bundle.sum_file_sizes = Some(self.run_sum_file_size(query)?);
        }
        if options.return_last_updated_on {
            bundle.last_updated_on = status.map(|s| s.changed_on);
        }
        Ok(bundle)
    }

    fn run_count_query(&self, query: &SqlQuery) -> Result<i64> {
        match query.count_query()? {
            CountQuery::Constant(count) => Ok(count),
            CountQuery::Sql { sql, parameters } => {
                let count = self.services.index.count_query(&sql, &parameters)?;
                Ok(query.limit_count(count))
            }
        }
    }

    fn run_facet_queries(&self, ctx: &ProgressContext, query: &SqlQuery) -> Result<Vec<FacetColumnResult>> {
        query
            .facet_queries(self.config.max_facet_values)?
            .iter()
            .map(|facet| {
                ctx.progress()?;
                let rows = self.services.index.query(ctx, facet.query())?;
                facet.translate(&rows)
            })
            .collect()
    }

    fn run_sum_file_size(&self, query: &SqlQuery) -> Result<SumFileSizes> {
        let max_rows = self.config.max_rows_for_file_size_sum;
        let Some(files_query) = query.file_sizes_query(max_rows)? else {
            return Ok(SumFileSizes::default());
        };
        let mut files = self
            .services
            .index
            .row_ids_and_versions(files_query.output_sql(), files_query.parameters())?;
        let greater_than = files.len() as u64 > max_rows;
        files.truncate(max_rows as usize);
        let sum_file_size_bytes = self
            .services
            .index
            .sum_of_file_sizes(ObjectType::Entity, &files)?;
        Ok(SumFileSizes {
            sum_file_size_bytes,
            greater_than,
        })
    }
}

/// Token for the page after this one. Only a full page can have a successor;
/// a LIMIT written in the query text bounds the whole window.
fn next_page_token(
    query: &SqlQuery,
    request: &TableQuery,
    max_bytes_per_page: Option<u64>,
    returned: u64,
) -> Result<Option<QueryNextPageToken>> {
    let Some(page_size) = query.max_rows_per_page() else {
        return Ok(None);
    };
    if returned == 0 || returned != page_size {
        return Ok(None);
    }
    let next_offset = query.offset().unwrap_or(0).saturating_add(returned);
    let limit = match query.text_limit() {
        Some(text_limit) => {
            let window_end = query.text_offset().unwrap_or(0).saturating_add(text_limit);
            if next_offset >= window_end {
                return Ok(None);
            }
            Some(window_end - next_offset)
        }
        None => None,
    };
    let next = TableQuery {
        offset: Some(next_offset),
        limit,
        ..request.clone()
    };
    QueryNextPageToken::new(&next, max_bytes_per_page).map(Some)
}
