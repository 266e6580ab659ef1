//! Evaluation of compiled SQL over in-memory rows
//!
//! Covers the SQL the compiler emits: filters with bind parameters,
//! IN/LIKE/IS NULL, the JSON list functions, full text MATCH, aggregates with
//! GROUP BY and HAVING, DISTINCT, ORDER BY and LIMIT/OFFSET. Text cells are
//! compared numerically when both sides parse as numbers.

use crate::error::{QueryError, Result};
use crate::parser::{
    function_args, function_name, group_by_exprs, is_aggregate_function, is_distinct,
    literal_u64, projection_has_aggregate, select_of, BinaryOperator, Expr, Function,
    FunctionArguments, ObjectNameExt, OrderByExpr, Query, SelectItem, TableFactor, Value,
};
use crate::planner::{Parameters, SqlValue};
use sqlparser::ast::{DuplicateTreatment, UnaryOperator};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One stored row: column name to text value. Absent columns are NULL.
pub(crate) type Cells = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Datum {
    fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    fn number(&self) -> Option<f64> {
        match self {
            Datum::Null => None,
            Datum::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            Datum::Text(s) => s.trim().parse().ok(),
        }
    }

    fn truth(&self) -> Option<bool> {
        match self {
            Datum::Null => None,
            Datum::Bool(b) => Some(*b),
            other => Some(other.number().map_or(false, |n| n != 0.0)),
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Datum::Null => None,
            Datum::Bool(b) => Some(b.to_string()),
            Datum::Int(i) => Some(i.to_string()),
            Datum::Float(f) => Some(f.to_string()),
            Datum::Text(s) => Some(s.clone()),
        }
    }

    pub(crate) fn into_cell(self) -> Option<String> {
        match self {
            Datum::Text(s) => Some(s),
            other => other.text(),
        }
    }
}

impl From<&SqlValue> for Datum {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Boolean(b) => Datum::Bool(*b),
            SqlValue::Integer(i) => Datum::Int(*i),
            SqlValue::Double(d) => Datum::Float(*d),
            SqlValue::Text(s) => Datum::Text(s.clone()),
        }
    }
}

fn compare(left: &Datum, right: &Datum) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match (left.number(), right.number()) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => Some(left.text().cmp(&right.text())),
    }
}

/// Total order for sorting; NULL sorts first
fn sort_cmp(left: &Datum, right: &Datum) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
    }
}

fn comparison(left: &Datum, right: &Datum, test: impl Fn(Ordering) -> bool) -> Datum {
    compare(left, right).map_or(Datum::Null, |o| Datum::Bool(test(o)))
}

fn arithmetic(op: &BinaryOperator, left: &Datum, right: &Datum) -> Result<Datum> {
    if let (Datum::Int(l), Datum::Int(r)) = (left, right) {
        let result = match op {
            BinaryOperator::Plus => l.checked_add(*r),
            BinaryOperator::Minus => l.checked_sub(*r),
            BinaryOperator::Multiply => l.checked_mul(*r),
            _ => None,
        };
        if let Some(result) = result {
            return Ok(Datum::Int(result));
        }
    }
    let (Some(l), Some(r)) = (left.number(), right.number()) else {
        return Ok(Datum::Null);
    };
    Ok(match op {
        BinaryOperator::Plus => Datum::Float(l + r),
        BinaryOperator::Minus => Datum::Float(l - r),
        BinaryOperator::Multiply => Datum::Float(l * r),
        BinaryOperator::Divide if r != 0.0 => Datum::Float(l / r),
        BinaryOperator::Divide => Datum::Null,
        other => {
            return Err(QueryError::Execution(format!("Unsupported operator: {}", other)))
        }
    })
}

fn binary(op: &BinaryOperator, left: Datum, right: Datum) -> Result<Datum> {
    Ok(match op {
        BinaryOperator::And => match (left.truth(), right.truth()) {
            (Some(false), _) | (_, Some(false)) => Datum::Bool(false),
            (Some(true), Some(true)) => Datum::Bool(true),
            _ => Datum::Null,
        },
        BinaryOperator::Or => match (left.truth(), right.truth()) {
            (Some(true), _) | (_, Some(true)) => Datum::Bool(true),
            (Some(false), Some(false)) => Datum::Bool(false),
            _ => Datum::Null,
        },
        BinaryOperator::Eq => comparison(&left, &right, |o| o == Ordering::Equal),
        BinaryOperator::NotEq => comparison(&left, &right, |o| o != Ordering::Equal),
        BinaryOperator::Lt => comparison(&left, &right, |o| o == Ordering::Less),
        BinaryOperator::LtEq => comparison(&left, &right, |o| o != Ordering::Greater),
        BinaryOperator::Gt => comparison(&left, &right, |o| o == Ordering::Greater),
        BinaryOperator::GtEq => comparison(&left, &right, |o| o != Ordering::Less),
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide => arithmetic(op, &left, &right)?,
        other => {
            return Err(QueryError::Execution(format!("Unsupported operator: {}", other)))
        }
    })
}

fn unary(op: &UnaryOperator, value: Datum) -> Result<Datum> {
    Ok(match op {
        UnaryOperator::Not => value.truth().map_or(Datum::Null, |b| Datum::Bool(!b)),
        UnaryOperator::Plus => value,
        UnaryOperator::Minus => match value {
            Datum::Int(i) => Datum::Int(-i),
            other => other.number().map_or(Datum::Null, |n| Datum::Float(-n)),
        },
        other => {
            return Err(QueryError::Execution(format!("Unsupported operator: {}", other)))
        }
    })
}

fn like_match(text: &str, pattern: &str) -> bool {
    let t_chars: Vec<char> = text.chars().collect();
    let p_chars: Vec<char> = pattern.chars().collect();
    like_match_recursive(&t_chars, &p_chars)
}

fn like_match_recursive(text: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('%') => {
            like_match_recursive(text, &pattern[1..])
                || (!text.is_empty() && like_match_recursive(&text[1..], pattern))
        }
        Some('_') => !text.is_empty() && like_match_recursive(&text[1..], &pattern[1..]),
        Some(c) => text.first() == Some(c) && like_match_recursive(&text[1..], &pattern[1..]),
    }
}

/// Elements of a stored JSON list as text
fn json_elements(value: &Datum) -> Result<Option<Vec<String>>> {
    let Some(text) = value.text() else {
        return Ok(None);
    };
    let elements: Vec<serde_json::Value> = serde_json::from_str(&text)
        .map_err(|e| QueryError::Execution(format!("Invalid JSON list {}: {}", text, e)))?;
    Ok(Some(
        elements
            .into_iter()
            .map(|e| match e {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
    ))
}

/// Natural language match: any search term appears in the content
fn text_matches(content: &[&String], search: &Datum) -> bool {
    let Some(search) = search.text() else {
        return false;
    };
    let content: Vec<String> = content.iter().map(|c| c.to_lowercase()).collect();
    search
        .split_whitespace()
        .map(str::to_lowercase)
        .any(|term| content.iter().any(|c| c.contains(&term)))
}

fn unsupported(expr: &Expr) -> QueryError {
    QueryError::Execution(format!("Unsupported expression: {}", expr))
}

type Item<'q> = (&'q Expr, Option<&'q str>);

fn projection_items(items: &[SelectItem]) -> Result<Vec<Item<'_>>> {
    items
        .iter()
        .map(|item| match item {
            SelectItem::UnnamedExpr(expr) => Ok((expr, None)),
            SelectItem::ExprWithAlias { expr, alias } => Ok((expr, Some(alias.value.as_str()))),
            other => Err(QueryError::Execution(format!(
                "Unsupported select item: {}",
                other
            ))),
        })
        .collect()
}

/// Position of an ORDER BY / GROUP BY ordinal or alias in the select list
fn item_position(expr: &Expr, items: &[Item<'_>]) -> Result<Option<usize>> {
    match expr {
        Expr::Value(Value::Number(n, _)) => {
            let ordinal: usize = n
                .parse()
                .map_err(|_| QueryError::Execution(format!("Invalid ordinal: {}", n)))?;
            if ordinal == 0 || ordinal > items.len() {
                return Err(QueryError::Execution(format!("Ordinal {} is out of range", ordinal)));
            }
            Ok(Some(ordinal - 1))
        }
        Expr::Identifier(ident) => Ok(items.iter().position(|(_, alias)| *alias == Some(ident.value.as_str()))),
        _ => Ok(None),
    }
}

/// Name of the single table a compiled query reads
pub(crate) fn table_name(query: &Query) -> Result<String> {
    let select = select_of(query)?;
    match select.from.as_slice() {
        [table] if table.joins.is_empty() => match &table.relation {
            TableFactor::Table { name, .. } => Ok(name.table_name()),
            other => Err(QueryError::Execution(format!("Unsupported table: {}", other))),
        },
        _ => Err(QueryError::Execution(
            "Only single table queries can be evaluated in memory".to_string(),
        )),
    }
}

pub(crate) struct Evaluator<'a> {
    parameters: &'a Parameters,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(parameters: &'a Parameters) -> Self {
        Self { parameters }
    }

    fn value(&self, value: &Value) -> Result<Datum> {
        match value {
            Value::Null => Ok(Datum::Null),
            Value::Boolean(b) => Ok(Datum::Bool(*b)),
            Value::Number(n, _) => n
                .parse()
                .map(Datum::Int)
                .or_else(|_| n.parse().map(Datum::Float))
                .map_err(|_| QueryError::Execution(format!("Invalid number: {}", n))),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Ok(Datum::Text(s.clone())),
            Value::Placeholder(name) => self
                .parameters
                .get(name.trim_start_matches(':'))
                .map(Datum::from)
                .ok_or_else(|| QueryError::Execution(format!("No value bound for {}", name))),
            other => Err(QueryError::Execution(format!("Unsupported value: {}", other))),
        }
    }

    /// Value of an expression for one row
    fn eval(&self, expr: &Expr, row: &Cells) -> Result<Datum> {
        match expr {
            Expr::Identifier(ident) => Ok(column(row, &ident.value)),
            Expr::CompoundIdentifier(parts) => Ok(parts
                .last()
                .map(|ident| column(row, &ident.value))
                .unwrap_or(Datum::Null)),
            Expr::Value(value) => self.value(value),
            Expr::Nested(inner) => self.eval(inner, row),
            Expr::BinaryOp { left, op, right } => {
                binary(op, self.eval(left, row)?, self.eval(right, row)?)
            }
            Expr::UnaryOp { op, expr } => unary(op, self.eval(expr, row)?),
            Expr::IsNull(inner) => Ok(Datum::Bool(self.eval(inner, row)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Datum::Bool(!self.eval(inner, row)?.is_null())),
            Expr::InList { expr, list, negated } => {
                let value = self.eval(expr, row)?;
                if value.is_null() {
                    return Ok(Datum::Null);
                }
                let mut found = false;
                for candidate in list {
                    if compare(&value, &self.eval(candidate, row)?) == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Ok(Datum::Bool(found != *negated))
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let value = self.eval(expr, row)?;
                let above = binary(&BinaryOperator::GtEq, value.clone(), self.eval(low, row)?)?;
                let below = binary(&BinaryOperator::LtEq, value, self.eval(high, row)?)?;
                let inside = binary(&BinaryOperator::And, above, below)?;
                if *negated {
                    unary(&UnaryOperator::Not, inside)
                } else {
                    Ok(inside)
                }
            }
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let (value, pattern) = (self.eval(expr, row)?, self.eval(pattern, row)?);
                Ok(match (value.text(), pattern.text()) {
                    (Some(value), Some(pattern)) => Datum::Bool(like_match(&value, &pattern) != *negated),
                    _ => Datum::Null,
                })
            }
            Expr::MatchAgainst {
                columns,
                match_value,
                ..
            } => {
                let content: Vec<&String> = columns.iter().filter_map(|c| row.get(&c.to_string())).collect();
                Ok(Datum::Bool(text_matches(&content, &self.value(match_value)?)))
            }
            Expr::Function(function) => self.eval_function(function, row),
            other => Err(unsupported(other)),
        }
    }

    fn eval_function(&self, function: &Function, row: &Cells) -> Result<Datum> {
        let name = function_name(function);
        if is_aggregate_function(&name) {
            return Err(QueryError::Execution(format!(
                "Aggregate function {} is not allowed here",
                name
            )));
        }
        let args = function_args(function)
            .into_iter()
            .map(|arg| self.eval(arg, row))
            .collect::<Result<Vec<_>>>()?;
        match (name.as_str(), args.as_slice()) {
            ("IFNULL", [value, fallback]) | ("COALESCE", [value, fallback]) => Ok(if value.is_null() {
                fallback.clone()
            } else {
                value.clone()
            }),
            ("JSON_ARRAY", values) => {
                let elements: Vec<String> = values.iter().filter_map(Datum::text).collect();
                serde_json::to_string(&elements)
                    .map(Datum::Text)
                    .map_err(|e| QueryError::Execution(e.to_string()))
            }
            ("JSON_OVERLAPS", [left, right]) => match (json_elements(left)?, json_elements(right)?) {
                (Some(left), Some(right)) => Ok(Datum::Bool(left.iter().any(|l| right.contains(l)))),
                _ => Ok(Datum::Null),
            },
            ("JSON_SEARCH", [document, _, pattern]) => {
                let (Some(elements), Some(pattern)) = (json_elements(document)?, pattern.text()) else {
                    return Ok(Datum::Null);
                };
                Ok(elements
                    .iter()
                    .position(|e| like_match(e, &pattern))
                    .map_or(Datum::Null, |i| Datum::Text(format!("\"$[{}]\"", i))))
            }
            ("UPPER", [value]) => Ok(value.text().map_or(Datum::Null, |s| Datum::Text(s.to_uppercase()))),
            ("LOWER", [value]) => Ok(value.text().map_or(Datum::Null, |s| Datum::Text(s.to_lowercase()))),
            _ => Err(QueryError::Execution(format!("Unsupported function: {}", function))),
        }
    }

    /// Value of an expression for a group of rows
    fn eval_group(&self, expr: &Expr, group: &[&Cells]) -> Result<Datum> {
        match expr {
            Expr::Function(function) if is_aggregate_function(&function_name(function)) => {
                self.aggregate(function, group)
            }
            Expr::Nested(inner) => self.eval_group(inner, group),
            Expr::BinaryOp { left, op, right } => binary(
                op,
                self.eval_group(left, group)?,
                self.eval_group(right, group)?,
            ),
            Expr::UnaryOp { op, expr } => unary(op, self.eval_group(expr, group)?),
            other => match group.first() {
                Some(row) => self.eval(other, row),
                None => Ok(Datum::Null),
            },
        }
    }

    fn aggregate(&self, function: &Function, group: &[&Cells]) -> Result<Datum> {
        let name = function_name(function);
        let args = function_args(function);
        let distinct = matches!(
            &function.args,
            FunctionArguments::List(list) if matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct))
        );

        if name == "COUNT" {
            if args.is_empty() {
                return Ok(Datum::Int(group.len() as i64));
            }
            let mut seen = HashSet::new();
            let mut count = 0;
            for row in group {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, row))
                    .collect::<Result<Vec<_>>>()?;
                if values.iter().any(Datum::is_null) {
                    continue;
                }
                let key: Vec<Option<String>> = values.into_iter().map(Datum::into_cell).collect();
                if distinct && !seen.insert(key) {
                    continue;
                }
                count += 1;
            }
            return Ok(Datum::Int(count));
        }

        let [arg] = args.as_slice() else {
            return Err(QueryError::Execution(format!(
                "{} takes exactly one argument",
                name
            )));
        };
        let mut values = Vec::with_capacity(group.len());
        for row in group {
            let value = self.eval(arg, row)?;
            if !value.is_null() {
                values.push(value);
            }
        }
        match name.as_str() {
            "MIN" => Ok(values.into_iter().min_by(sort_cmp).unwrap_or(Datum::Null)),
            "MAX" => Ok(values.into_iter().max_by(sort_cmp).unwrap_or(Datum::Null)),
            "SUM" | "AVG" if values.is_empty() => Ok(Datum::Null),
            "SUM" => values
                .iter()
                .try_fold(Datum::Int(0), |total, v| binary(&BinaryOperator::Plus, total, v.clone())),
            "AVG" => {
                let numbers: Vec<f64> = values.iter().filter_map(Datum::number).collect();
                Ok(Datum::Float(numbers.iter().sum::<f64>() / numbers.len().max(1) as f64))
            }
            other => Err(QueryError::Execution(format!(
                "Unsupported aggregate function: {}",
                other
            ))),
        }
    }

    fn group<'r>(
        &self,
        rows: Vec<&'r Cells>,
        group_by: &[Expr],
        items: &[Item<'_>],
    ) -> Result<Vec<Vec<&'r Cells>>> {
        if group_by.is_empty() {
            return Ok(vec![rows]);
        }
        let mut slots: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        let mut groups: Vec<Vec<&'r Cells>> = Vec::new();
        for row in rows {
            let mut key = Vec::with_capacity(group_by.len());
            for expr in group_by {
                let expr = match item_position(expr, items)? {
                    Some(position) => items[position].0,
                    None => expr,
                };
                key.push(self.eval(expr, row)?.into_cell());
            }
            let slot = *slots.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(row);
        }
        Ok(groups)
    }

    fn sort_key(
        &self,
        order: &OrderByExpr,
        items: &[Item<'_>],
        values: &[Datum],
        eval: &dyn Fn(&Expr) -> Result<Datum>,
    ) -> Result<Datum> {
        match item_position(&order.expr, items)? {
            Some(position) => Ok(values[position].clone()),
            None => eval(&order.expr),
        }
    }

    /// Run a compiled SELECT over the rows of its table
    pub(crate) fn run(&self, query: &Query, rows: &[Cells]) -> Result<Vec<Vec<Option<String>>>> {
        let select = select_of(query)?;
        let mut filtered = Vec::new();
        for row in rows {
            let keep = match &select.selection {
                Some(predicate) => self.eval(predicate, row)?.truth().unwrap_or(false),
                None => true,
            };
            if keep {
                filtered.push(row);
            }
        }

        let items = projection_items(&select.projection)?;
        let order: &[OrderByExpr] = query
            .order_by
            .as_ref()
            .map(|o| o.exprs.as_slice())
            .unwrap_or(&[]);
        let group_by = group_by_exprs(select);
        let mut output: Vec<(Vec<Datum>, Vec<Datum>)> = Vec::new();

        if !group_by.is_empty() || projection_has_aggregate(select) {
            for group in self.group(filtered, group_by, &items)? {
                if let Some(having) = &select.having {
                    if !self.eval_group(having, &group)?.truth().unwrap_or(false) {
                        continue;
                    }
                }
                let values = items
                    .iter()
                    .map(|(expr, _)| self.eval_group(expr, &group))
                    .collect::<Result<Vec<_>>>()?;
                let eval = |expr: &Expr| self.eval_group(expr, &group);
                let keys = order
                    .iter()
                    .map(|o| self.sort_key(o, &items, &values, &eval))
                    .collect::<Result<Vec<_>>>()?;
                output.push((values, keys));
            }
        } else {
            for row in filtered {
                let values = items
                    .iter()
                    .map(|(expr, _)| self.eval(expr, row))
                    .collect::<Result<Vec<_>>>()?;
                let eval = |expr: &Expr| self.eval(expr, row);
                let keys = order
                    .iter()
                    .map(|o| self.sort_key(o, &items, &values, &eval))
                    .collect::<Result<Vec<_>>>()?;
                output.push((values, keys));
            }
        }

        if is_distinct(select) {
            let mut seen = HashSet::new();
            output.retain(|(values, _)| {
                let key: Vec<Option<String>> = values.iter().map(|v| v.clone().into_cell()).collect();
                seen.insert(key)
            });
        }

        if !order.is_empty() {
            output.sort_by(|(_, left), (_, right)| {
                for ((l, r), o) in left.iter().zip(right).zip(order) {
                    let ordering = sort_cmp(l, r);
                    let ordering = if o.asc == Some(false) { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = query
            .offset
            .as_ref()
            .and_then(|o| literal_u64(&o.value))
            .unwrap_or(0) as usize;
        let limit = query
            .limit
            .as_ref()
            .and_then(literal_u64)
            .map_or(usize::MAX, |l| l as usize);
        Ok(output
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(values, _)| values.into_iter().map(Datum::into_cell).collect())
            .collect())
    }
}

fn column(row: &Cells, name: &str) -> Datum {
    row.get(name).map_or(Datum::Null, |v| Datum::Text(v.clone()))
}
