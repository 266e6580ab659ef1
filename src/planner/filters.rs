//! Caller-supplied sort and filter overrides

use crate::error::{QueryError, Result};
use crate::parser::{and_all, parse_expr, parse_order_by, quote_identifier, quote_literal, Expr, OrderBy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One sort key. Overrides any ORDER BY written in the query text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortItem {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<SortDirection>,
}

impl SortItem {
    pub fn new(column: impl Into<String>, direction: Option<SortDirection>) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn to_sql(&self) -> String {
        match self.direction {
            Some(SortDirection::Asc) => format!("{} ASC", quote_identifier(&self.column)),
            Some(SortDirection::Desc) => format!("{} DESC", quote_identifier(&self.column)),
            None => quote_identifier(&self.column),
        }
    }
}

/// ORDER BY for the given sort keys, None when there are none
pub fn sort_to_order_by(sort: &[SortItem]) -> Result<Option<OrderBy>> {
    if sort.is_empty() {
        return Ok(None);
    }
    let text: Vec<String> = sort.iter().map(SortItem::to_sql).collect();
    parse_order_by(&text.join(", ")).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SingleValueOperator {
    Equal,
    Like,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MultiValueFunction {
    Has,
    HasLike,
}

/// A declarative filter ANDed onto the query's WHERE clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "concreteType", rename_all = "camelCase")]
pub enum QueryFilter {
    #[serde(rename_all = "camelCase")]
    ColumnSingleValue {
        column_name: String,
        operator: SingleValueOperator,
        values: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ColumnMultiValueFunction {
        column_name: String,
        function: MultiValueFunction,
        values: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    TextMatches { search_expression: String },
}

impl QueryFilter {
    /// Public query text for the filter, always parenthesized
    pub fn to_sql(&self) -> Result<String> {
        match self {
            QueryFilter::ColumnSingleValue {
                column_name,
                operator,
                values,
            } => {
                require_values(column_name, values)?;
                let column = quote_identifier(column_name);
                let body = match operator {
                    SingleValueOperator::Equal => join_each(&column, "=", values),
                    SingleValueOperator::Like => join_each(&column, "LIKE", values),
                    SingleValueOperator::In => format!("{} IN ({})", column, literal_list(values)),
                };
                Ok(format!("({})", body))
            }
            QueryFilter::ColumnMultiValueFunction {
                column_name,
                function,
                values,
            } => {
                require_values(column_name, values)?;
                let keyword = match function {
                    MultiValueFunction::Has => "HAS",
                    MultiValueFunction::HasLike => "HAS_LIKE",
                };
                Ok(format!(
                    "({} {} ({}))",
                    quote_identifier(column_name),
                    keyword,
                    literal_list(values)
                ))
            }
            QueryFilter::TextMatches { search_expression } => {
                if search_expression.trim().is_empty() {
                    return Err(QueryError::InvalidArgument(
                        "TextMatchesQueryFilter.searchExpression is required".to_string(),
                    ));
                }
                Ok(format!("(TEXT_MATCHES({}))", quote_literal(search_expression)))
            }
        }
    }

    pub fn to_expr(&self) -> Result<Expr> {
        parse_expr(&self.to_sql()?)
    }
}

/// AND of all filters, None when there are none
pub fn filters_to_expr(filters: &[QueryFilter]) -> Result<Option<Expr>> {
    let exprs = filters
        .iter()
        .map(QueryFilter::to_expr)
        .collect::<Result<Vec<_>>>()?;
    Ok(and_all(exprs))
}

fn require_values(column_name: &str, values: &[String]) -> Result<()> {
    if values.is_empty() {
        return Err(QueryError::InvalidArgument(format!(
            "Filter values cannot be empty for column: {}",
            column_name
        )));
    }
    Ok(())
}

fn join_each(column: &str, operator: &str, values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("{} {} {}", column, operator, quote_literal(v)))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn literal_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<Vec<_>>()
        .join(", ")
}
