//! Public query model to backing-index SQL
//!
//! Column references become `_C<id>_`, tables become `T<id>` (or `_A<n>`
//! when aliased) and literals become named `:bN` bind parameters.

use super::mapper::{ColumnReference, TableAndColumnMapper, TableInfo};
use crate::error::{QueryError, Result};
use crate::index::{ROW_BENEFACTOR, ROW_ETAG, ROW_ID, ROW_VERSION};
use crate::parser::{
    function_args, function_name, parse_internal_expr, projection_aliases, select_of_mut,
    table_factors_mut, BinaryOperator, Expr, Ident, ObjectName, Query, TableFactor, Value, HAS,
    HAS_LIKE,
};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{VisitMut, VisitorMut};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;

pub const TEXT_MATCHES: &str = "TEXT_MATCHES";
pub const ROW_SEARCH_CONTENT: &str = "ROW_SEARCH_CONTENT";

const RESERVED_COLUMNS: &[&str] = &[ROW_ID, ROW_VERSION, ROW_ETAG, ROW_BENEFACTOR, ROW_SEARCH_CONTENT];
const BENEFACTOR_PREFIX: &str = "ROW_BENEFACTOR_";

/// A bound parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

impl SqlValue {
    /// None for values that stay literal (NULL, placeholders)
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n, _) => Some(
                n.parse::<i64>()
                    .map(SqlValue::Integer)
                    .unwrap_or_else(|_| n.parse().map(SqlValue::Double).unwrap_or(SqlValue::Text(n.clone()))),
            ),
            Value::SingleQuotedString(s)
            | Value::DoubleQuotedString(s)
            | Value::EscapedStringLiteral(s)
            | Value::NationalStringLiteral(s) => Some(SqlValue::Text(s.clone())),
            Value::Boolean(b) => Some(SqlValue::Boolean(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Boolean(b) => write!(f, "{}", b),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Double(d) => write!(f, "{}", d),
            SqlValue::Text(s) => f.write_str(s),
        }
    }
}

/// Bind parameters keyed by name without the leading colon (`b0`, `b1`, ...)
pub type Parameters = BTreeMap<String, SqlValue>;

pub fn is_reserved_column(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED_COLUMNS.contains(&upper.as_str()) || upper.starts_with(BENEFACTOR_PREFIX)
}

/// Translate a public query model into backing-index SQL.
pub fn translate_query(mapper: &TableAndColumnMapper, model: &Query) -> Result<(Query, Parameters)> {
    let mut query = model.clone();
    let mut translator = Translator {
        mapper,
        aliases: Vec::new(),
        parameters: Parameters::new(),
        parameterize: true,
    };

    let select = select_of_mut(&mut query)?;
    translator.aliases = projection_aliases(select);
    if let ControlFlow::Break(e) = select.visit(&mut translator) {
        return Err(e);
    }
    for factor in table_factors_mut(select) {
        if let TableFactor::Table { name, alias, .. } = factor {
            let table = correlated_table(mapper, name, alias.as_ref().map(|a| a.name.value.as_str()))?;
            *name = ObjectName(vec![Ident::new(table.identity().internal_name())]);
            if let Some(alias) = alias {
                alias.name = Ident::new(table.translated_name());
            }
        }
    }

    // sort keys keep their literals (ordinals)
    translator.parameterize = false;
    if let Some(order_by) = query.order_by.as_mut() {
        if let ControlFlow::Break(e) = order_by.exprs.visit(&mut translator) {
            return Err(e);
        }
    }
    Ok((query, translator.parameters))
}

/// The mapped table a FROM entry stands for. A table joined to itself is
/// told apart by its alias.
fn correlated_table<'m>(
    mapper: &'m TableAndColumnMapper,
    name: &ObjectName,
    alias: Option<&str>,
) -> Result<&'m TableInfo> {
    let found = mapper
        .lookup_table_name_correlation(name)
        .ok_or_else(|| QueryError::Internal(format!("Table {} was not mapped", name)))?;
    if found.alias() == alias {
        return Ok(found);
    }
    mapper
        .tables()
        .iter()
        .find(|t| t.is_match(name) && t.alias() == alias)
        .ok_or_else(|| QueryError::Internal(format!("Table {} was not mapped", name)))
}

struct Translator<'m> {
    mapper: &'m TableAndColumnMapper,
    aliases: Vec<String>,
    parameters: Parameters,
    parameterize: bool,
}

impl Translator<'_> {
    fn translate_column(&self, reference: ColumnReference) -> Result<Expr> {
        if let Some(found) = self.mapper.lookup_column_reference(&reference)? {
            let column = Ident::new(found.translated_column_name());
            if found.table.alias().is_some() || self.mapper.number_of_tables() > 1 {
                return Ok(Expr::CompoundIdentifier(vec![
                    Ident::new(found.table.translated_name()),
                    column,
                ]));
            }
            return Ok(Expr::Identifier(column));
        }
        if is_reserved_column(&reference.name) {
            let column = Ident::new(reference.name.to_ascii_uppercase());
            return match &reference.qualifier {
                None => Ok(Expr::Identifier(column)),
                Some(qualifier) => {
                    let table = self
                        .mapper
                        .tables()
                        .iter()
                        .find(|t| t.matches_qualifier(qualifier))
                        .ok_or_else(|| {
                            QueryError::InvalidArgument(format!(
                                "Unknown table or alias: {}",
                                qualifier
                            ))
                        })?;
                    Ok(Expr::CompoundIdentifier(vec![
                        Ident::new(table.translated_name()),
                        column,
                    ]))
                }
            };
        }
        if reference.qualifier.is_none() && self.aliases.contains(&reference.name) {
            return Ok(Expr::Identifier(Ident::new(reference.name)));
        }
        Err(QueryError::InvalidArgument(format!(
            "Column does not exist: {}",
            reference.text()
        )))
    }

    fn bind(&mut self, value: SqlValue) -> Expr {
        let name = format!("b{}", self.parameters.len());
        let placeholder = format!(":{}", name);
        self.parameters.insert(name, value);
        Expr::Value(Value::Placeholder(placeholder))
    }

    /// `HAS`/`HAS_LIKE` only apply to list columns
    fn validate_multi_value(&self, left: &Expr, operator: &str) -> Result<()> {
        let is_list = match ColumnReference::from_expr(left) {
            Some(reference) => self
                .mapper
                .lookup_column_reference(&reference)?
                .map(|m| m.column.column_type.is_list())
                .unwrap_or(false),
            None => false,
        };
        if !is_list {
            return Err(QueryError::InvalidArgument(format!(
                "The {} keyword only works for columns that hold list values",
                operator
            )));
        }
        Ok(())
    }

    fn rewrite(&mut self, expr: &Expr) -> Result<Option<Expr>> {
        match expr {
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => match ColumnReference::from_expr(expr) {
                Some(reference) => self.translate_column(reference).map(Some),
                None => Err(QueryError::InvalidArgument(format!(
                    "Invalid column reference: {}",
                    expr
                ))),
            },
            Expr::Value(value) if self.parameterize => {
                Ok(SqlValue::from_value(value).map(|v| self.bind(v)))
            }
            Expr::Function(function) if function_name(function) == TEXT_MATCHES => {
                match function_args(function).as_slice() {
                    [search] => parse_internal_expr(&format!(
                        "MATCH ({}) AGAINST ({})",
                        ROW_SEARCH_CONTENT, search
                    ))
                    .map(Some),
                    _ => Err(QueryError::InvalidArgument(format!(
                        "{} requires a single search expression",
                        TEXT_MATCHES
                    ))),
                }
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Custom(op),
                right,
            } => {
                let values: Vec<String> = match right.as_ref() {
                    Expr::Tuple(values) => values.iter().map(|v| v.to_string()).collect(),
                    other => vec![other.to_string()],
                };
                let sql = match op.as_str() {
                    HAS => format!("JSON_OVERLAPS({}, JSON_ARRAY({}))", left, values.join(", ")),
                    HAS_LIKE => {
                        let searches: Vec<String> = values
                            .iter()
                            .map(|v| format!("JSON_SEARCH({}, 'one', {}) IS NOT NULL", left, v))
                            .collect();
                        format!("({})", searches.join(" OR "))
                    }
                    other => {
                        return Err(QueryError::InvalidArgument(format!(
                            "Unsupported operator: {}",
                            other
                        )))
                    }
                };
                parse_internal_expr(&sql).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl VisitorMut for Translator<'_> {
    type Break = QueryError;

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        if let Expr::BinaryOp {
            left,
            op: BinaryOperator::Custom(op),
            ..
        } = expr
        {
            if let Err(e) = self.validate_multi_value(left, op) {
                return ControlFlow::Break(e);
            }
        }
        ControlFlow::Continue(())
    }

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        match self.rewrite(expr) {
            Ok(Some(rewritten)) => {
                *expr = rewritten;
                ControlFlow::Continue(())
            }
            Ok(None) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(e),
        }
    }
}
