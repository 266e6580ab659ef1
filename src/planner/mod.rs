//! Query planner module
//!
//! Maps public table queries onto the backing index: table and column
//! resolution, translation, caller filters, facets and row-level security.

mod compiler;
mod facet;
mod filters;
mod mapper;
mod security;
mod translator;

pub use compiler::{
    CountQuery, FacetTransformer, SelectColumn, SqlQuery, SqlQueryBuilder, SUBQUERY_NOT_SUPPORTED,
};
pub use facet::{
    FacetColumn, FacetColumnRequest, FacetColumnResult, FacetModel, FacetValueCount,
    NULL_VALUE_KEYWORD,
};
pub use filters::{
    filters_to_expr, sort_to_order_by, MultiValueFunction, QueryFilter, SingleValueOperator,
    SortDirection, SortItem,
};
pub use mapper::{
    ColumnReference, ColumnReferenceMatch, TableAndColumnMapper, TableInfo,
    JOIN_NOT_SUPPORTED_IN_THIS_CONTEXT,
};
pub use security::{
    apply_row_filter, build_row_filter, BenefactorRestriction, RowFilter, UNMATCHABLE_BENEFACTOR,
};
pub use translator::{is_reserved_column, translate_query, Parameters, SqlValue, TEXT_MATCHES};
