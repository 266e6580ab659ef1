//! AST helpers
//!
//! Re-exports the sqlparser types used across the crate together with small
//! conveniences for reading and rewriting table queries.

pub use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr,
    Ident, ObjectName, Offset, OffsetRows, OrderBy, OrderByExpr, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, TableWithJoins, Value,
};

use crate::error::{QueryError, Result};
use sqlparser::ast::{visit_expressions, Distinct};
use std::ops::ControlFlow;

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "GROUP_CONCAT",
    "STD",
    "STDDEV",
    "STDDEV_POP",
    "STDDEV_SAMP",
    "VARIANCE",
    "VAR_POP",
    "VAR_SAMP",
    "BIT_AND",
    "BIT_OR",
    "BIT_XOR",
];

/// Extension trait for Ident
pub trait IdentExt {
    fn as_str(&self) -> &str;
}

impl IdentExt for Ident {
    fn as_str(&self) -> &str {
        &self.value
    }
}

/// Extension trait for ObjectName
pub trait ObjectNameExt {
    fn table_name(&self) -> String;
}

impl ObjectNameExt for ObjectName {
    fn table_name(&self) -> String {
        self.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
    }
}

/// Wrap a name in double quotes, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrap a value in single quotes, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn is_aggregate_function(name: &str) -> bool {
    AGGREGATE_FUNCTIONS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(name))
}

/// Upper-cased name of a function call
pub fn function_name(function: &Function) -> String {
    function.name.table_name().to_ascii_uppercase()
}

/// Positional argument expressions of a function call
pub fn function_args(function: &Function) -> Vec<&Expr> {
    match &function.args {
        FunctionArguments::List(list) => list
            .args
            .iter()
            .filter_map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The body of a simple `SELECT` query
pub fn select_of(query: &Query) -> Result<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select),
        _ => Err(QueryError::InvalidArgument(
            "Only simple SELECT queries are supported".to_string(),
        )),
    }
}

pub fn select_of_mut(query: &mut Query) -> Result<&mut Select> {
    match query.body.as_mut() {
        SetExpr::Select(select) => Ok(select),
        _ => Err(QueryError::InvalidArgument(
            "Only simple SELECT queries are supported".to_string(),
        )),
    }
}

/// Every table factor of the FROM clause, joins included, in appearance order
pub fn table_factors(select: &Select) -> Vec<&TableFactor> {
    select
        .from
        .iter()
        .flat_map(|t| std::iter::once(&t.relation).chain(t.joins.iter().map(|j| &j.relation)))
        .collect()
}

pub fn table_factors_mut(select: &mut Select) -> Vec<&mut TableFactor> {
    select
        .from
        .iter_mut()
        .flat_map(|t| {
            std::iter::once(&mut t.relation).chain(t.joins.iter_mut().map(|j| &mut j.relation))
        })
        .collect()
}

pub fn group_by_exprs(select: &Select) -> &[Expr] {
    match &select.group_by {
        GroupByExpr::Expressions(exprs, ..) => exprs,
        _ => &[],
    }
}

pub fn is_distinct(select: &Select) -> bool {
    matches!(select.distinct, Some(Distinct::Distinct))
}

/// True if any function with the given name appears anywhere in the select
pub fn contains_function(select: &Select, name: &str) -> bool {
    let flow = visit_expressions(select, |expr| match expr {
        Expr::Function(f) if function_name(f) == name => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    });
    flow.is_break()
}

/// True if the query has a WITH clause or a subquery anywhere in its
/// select list, FROM, WHERE, GROUP BY, HAVING or ORDER BY.
pub fn contains_subquery(query: &Query) -> bool {
    if query.with.is_some() {
        return true;
    }
    let flow = visit_expressions(query, |expr| match expr {
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    });
    flow.is_break()
}

/// True if the projection calls an aggregate function
pub fn projection_has_aggregate(select: &Select) -> bool {
    let flow = visit_expressions(&select.projection, |expr| match expr {
        Expr::Function(f) if is_aggregate_function(&function_name(f)) => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    });
    flow.is_break()
}

/// Aliases declared in the select list
pub fn projection_aliases(select: &Select) -> Vec<String> {
    select
        .projection
        .iter()
        .filter_map(|item| match item {
            SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
            _ => None,
        })
        .collect()
}

/// Non-negative integer literal, as used by LIMIT and OFFSET
pub fn literal_u64(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse().ok(),
        _ => None,
    }
}

pub fn number(value: u64) -> Expr {
    Expr::Value(Value::Number(value.to_string(), false))
}

pub fn nested(expr: Expr) -> Expr {
    match expr {
        Expr::Nested(_) => expr,
        other => Expr::Nested(Box::new(other)),
    }
}

pub fn and(left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::And,
        right: Box::new(right),
    }
}

/// AND together the given predicates, parenthesizing each one.
pub fn and_all(predicates: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    predicates.into_iter().map(nested).reduce(and)
}
