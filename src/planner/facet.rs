//! Facet engine
//!
//! Every faceted column of a schema yields one auxiliary aggregate query.
//! Enumeration facets count rows per value, range facets report the observed
//! min and max. Each facet query ignores its own column's selection so the
//! result shows what remains selectable, while all other selections apply.

use crate::error::{QueryError, Result};
use crate::parser::{and_all, parse_expr, quote_identifier, quote_literal, Expr};
use crate::schema::{ColumnSchema, FacetType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Facet value standing for SQL NULL
pub const NULL_VALUE_KEYWORD: &str = "UNDEFINED_NULL_NOTSET";

pub const FACET_VALUE_ALIAS: &str = "facet_value";
pub const FREQUENCY_ALIAS: &str = "frequency";
pub const MIN_ALIAS: &str = "minimum";
pub const MAX_ALIAS: &str = "maximum";

/// Selection on one faceted column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "concreteType", rename_all = "camelCase")]
pub enum FacetColumnRequest {
    #[serde(rename_all = "camelCase")]
    Values {
        column_name: String,
        #[serde(default)]
        facet_values: BTreeSet<String>,
    },
    #[serde(rename_all = "camelCase")]
    Range {
        column_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<String>,
    },
}

impl FacetColumnRequest {
    pub fn column_name(&self) -> &str {
        match self {
            FacetColumnRequest::Values { column_name, .. } => column_name,
            FacetColumnRequest::Range { column_name, .. } => column_name,
        }
    }

    fn facet_type(&self) -> FacetType {
        match self {
            FacetColumnRequest::Values { .. } => FacetType::Enumeration,
            FacetColumnRequest::Range { .. } => FacetType::Range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetValueCount {
    pub value: String,
    pub count: i64,
    pub is_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "facetType", rename_all = "camelCase")]
pub enum FacetColumnResult {
    #[serde(rename = "enumeration", rename_all = "camelCase")]
    Values {
        column_name: String,
        facet_values: Vec<FacetValueCount>,
    },
    #[serde(rename = "range", rename_all = "camelCase")]
    Range {
        column_name: String,
        column_min: Option<String>,
        column_max: Option<String>,
        selected_min: Option<String>,
        selected_max: Option<String>,
    },
}

impl FacetColumnResult {
    pub fn column_name(&self) -> &str {
        match self {
            FacetColumnResult::Values { column_name, .. } => column_name,
            FacetColumnResult::Range { column_name, .. } => column_name,
        }
    }
}

/// One faceted column with its current selection
#[derive(Debug, Clone, PartialEq)]
pub struct FacetColumn {
    column: ColumnSchema,
    facet_type: FacetType,
    request: Option<FacetColumnRequest>,
}

impl FacetColumn {
    pub fn name(&self) -> &str {
        &self.column.name
    }

    pub fn facet_type(&self) -> FacetType {
        self.facet_type
    }

    /// Public query text restricting rows to the selection, if any
    pub fn filter_sql(&self) -> Option<String> {
        let column = quote_identifier(&self.column.name);
        match self.request.as_ref()? {
            FacetColumnRequest::Values { facet_values, .. } => {
                if facet_values.is_empty() {
                    return None;
                }
                let mut parts = Vec::new();
                let mut list_values = Vec::new();
                for value in facet_values {
                    if value == NULL_VALUE_KEYWORD {
                        parts.push(format!("{} IS NULL", column));
                    } else if self.column.column_type.is_list() {
                        list_values.push(quote_literal(value));
                    } else {
                        parts.push(format!("{} = {}", column, quote_literal(value)));
                    }
                }
                if !list_values.is_empty() {
                    parts.push(format!("{} HAS ({})", column, list_values.join(", ")));
                }
                Some(format!("({})", parts.join(" OR ")))
            }
            FacetColumnRequest::Range { min, max, .. } => {
                if min.as_deref() == Some(NULL_VALUE_KEYWORD) || max.as_deref() == Some(NULL_VALUE_KEYWORD) {
                    return Some(format!("({} IS NULL)", column));
                }
                let mut parts = Vec::new();
                if let Some(min) = min {
                    parts.push(format!("{} >= {}", column, quote_literal(min)));
                }
                if let Some(max) = max {
                    parts.push(format!("{} <= {}", column, quote_literal(max)));
                }
                if parts.is_empty() {
                    return None;
                }
                Some(format!("({})", parts.join(" AND ")))
            }
        }
    }

    /// Public SELECT for this facet over `table` restricted by `where_clause`
    pub fn facet_sql(&self, table: &str, where_clause: Option<&Expr>, max_values: u64) -> String {
        let column = quote_identifier(&self.column.name);
        let where_sql = where_clause
            .map(|w| format!(" WHERE {}", w))
            .unwrap_or_default();
        match self.facet_type {
            FacetType::Enumeration => format!(
                "SELECT {col} AS {value}, COUNT(*) AS {freq} FROM {table}{where_sql} GROUP BY {col} ORDER BY {freq} DESC, {value} ASC LIMIT {max}",
                col = column,
                value = FACET_VALUE_ALIAS,
                freq = FREQUENCY_ALIAS,
                table = table,
                where_sql = where_sql,
                max = max_values,
            ),
            FacetType::Range => format!(
                "SELECT MIN({col}) AS {min}, MAX({col}) AS {max} FROM {table}{where_sql}",
                col = column,
                min = MIN_ALIAS,
                max = MAX_ALIAS,
                table = table,
                where_sql = where_sql,
            ),
        }
    }

    /// Typed facet result from the facet query's rows (value columns only)
    pub fn translate_results(&self, rows: &[Vec<Option<String>>]) -> Result<FacetColumnResult> {
        let column_name = self.column.name.clone();
        match self.facet_type {
            FacetType::Enumeration => {
                let selected = match &self.request {
                    Some(FacetColumnRequest::Values { facet_values, .. }) => facet_values.clone(),
                    _ => BTreeSet::new(),
                };
                let facet_values = rows
                    .iter()
                    .map(|row| {
                        let value = row
                            .first()
                            .cloned()
                            .flatten()
                            .unwrap_or_else(|| NULL_VALUE_KEYWORD.to_string());
                        let count = parse_count(row.get(1).and_then(|c| c.as_deref()))?;
                        Ok(FacetValueCount {
                            is_selected: selected.contains(&value),
                            value,
                            count,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(FacetColumnResult::Values {
                    column_name,
                    facet_values,
                })
            }
            FacetType::Range => {
                let first = rows.first();
                let value = |i: usize| first.and_then(|r| r.get(i).cloned().flatten());
                let (selected_min, selected_max) = match &self.request {
                    Some(FacetColumnRequest::Range { min, max, .. }) => (min.clone(), max.clone()),
                    _ => (None, None),
                };
                Ok(FacetColumnResult::Range {
                    column_name,
                    column_min: value(0),
                    column_max: value(1),
                    selected_min,
                    selected_max,
                })
            }
        }
    }
}

fn parse_count(text: Option<&str>) -> Result<i64> {
    let text = text.ok_or_else(|| QueryError::Execution("Facet count is missing".to_string()))?;
    text.parse()
        .map_err(|_| QueryError::Execution(format!("Facet count is not a number: {}", text)))
}

/// The faceted columns of a schema, in schema order, with their selections
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FacetModel {
    columns: Vec<FacetColumn>,
}

impl FacetModel {
    pub fn new(selected: &[FacetColumnRequest], schema: &[ColumnSchema]) -> Result<Self> {
        for (i, request) in selected.iter().enumerate() {
            let name = request.column_name();
            if selected[..i].iter().any(|r| r.column_name() == name) {
                return Err(QueryError::InvalidArgument(format!(
                    "Facet column {} was selected more than once",
                    name
                )));
            }
            let column = schema.iter().find(|c| c.name == name).ok_or_else(|| {
                QueryError::InvalidArgument(format!("Facet column {} does not exist", name))
            })?;
            if column.facet_type != Some(request.facet_type()) {
                return Err(QueryError::InvalidArgument(format!(
                    "Column {} is not a {:?} facet",
                    name,
                    request.facet_type()
                )));
            }
        }

        let columns = schema
            .iter()
            .filter_map(|column| {
                column.facet_type.map(|facet_type| FacetColumn {
                    column: column.clone(),
                    facet_type,
                    request: selected
                        .iter()
                        .find(|r| r.column_name() == column.name)
                        .cloned(),
                })
            })
            .collect();
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[FacetColumn] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// AND of every active selection, skipping the `except` column
    pub fn filter_expr(&self, except: Option<&str>) -> Result<Option<Expr>> {
        let exprs = self
            .columns
            .iter()
            .filter(|c| Some(c.name()) != except)
            .filter_map(FacetColumn::filter_sql)
            .map(|sql| parse_expr(&sql))
            .collect::<Result<Vec<_>>>()?;
        Ok(and_all(exprs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new(1, "color", ColumnType::String).with_facet(FacetType::Enumeration),
            ColumnSchema::new(2, "size", ColumnType::Integer).with_facet(FacetType::Range),
            ColumnSchema::new(3, "tags", ColumnType::StringList).with_facet(FacetType::Enumeration),
            ColumnSchema::new(4, "plain", ColumnType::String),
        ]
    }

    fn values(column: &str, values: &[&str]) -> FacetColumnRequest {
        FacetColumnRequest::Values {
            column_name: column.into(),
            facet_values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_columns_in_schema_order() {
        let model = FacetModel::new(&[], &schema()).unwrap();
        let names: Vec<&str> = model.columns().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["color", "size", "tags"]);
        assert!(model.filter_expr(None).unwrap().is_none());
    }

    #[test]
    fn test_value_filter_with_null() {
        let model = FacetModel::new(&[values("color", &["red", NULL_VALUE_KEYWORD])], &schema()).unwrap();
        assert_eq!(
            model.columns()[0].filter_sql().unwrap(),
            "(\"color\" IS NULL OR \"color\" = 'red')"
        );
    }

    #[test]
    fn test_list_filter_uses_has() {
        let model = FacetModel::new(&[values("tags", &["a", "b"])], &schema()).unwrap();
        assert_eq!(
            model.columns()[2].filter_sql().unwrap(),
            "(\"tags\" HAS ('a', 'b'))"
        );
    }

    #[test]
    fn test_range_filter() {
        let request = FacetColumnRequest::Range {
            column_name: "size".into(),
            min: Some("1".into()),
            max: None,
        };
        let model = FacetModel::new(&[request], &schema()).unwrap();
        assert_eq!(model.columns()[1].filter_sql().unwrap(), "(\"size\" >= '1')");
    }

    #[test]
    fn test_filter_expr_excludes_own_column() {
        let range = FacetColumnRequest::Range {
            column_name: "size".into(),
            min: Some("1".into()),
            max: Some("5".into()),
        };
        let model = FacetModel::new(&[values("color", &["red"]), range], &schema()).unwrap();
        assert_eq!(
            model.filter_expr(None).unwrap().unwrap().to_string(),
            "(\"color\" = 'red') AND (\"size\" >= '1' AND \"size\" <= '5')"
        );
        assert_eq!(
            model.filter_expr(Some("size")).unwrap().unwrap().to_string(),
            "(\"color\" = 'red')"
        );
    }

    #[test]
    fn test_invalid_requests() {
        assert!(FacetModel::new(&[values("plain", &["x"])], &schema()).is_err());
        assert!(FacetModel::new(&[values("missing", &["x"])], &schema()).is_err());
        let wrong_type = FacetColumnRequest::Range {
            column_name: "color".into(),
            min: None,
            max: None,
        };
        assert!(FacetModel::new(&[wrong_type], &schema()).is_err());
        assert!(FacetModel::new(&[values("color", &[]), values("color", &[])], &schema()).is_err());
    }

    #[test]
    fn test_facet_sql() {
        let model = FacetModel::new(&[], &schema()).unwrap();
        let filter = parse_expr("(\"size\" >= '1')").unwrap();
        assert_eq!(
            model.columns()[0].facet_sql("syn123", Some(&filter), 100),
            "SELECT \"color\" AS facet_value, COUNT(*) AS frequency FROM syn123 WHERE (\"size\" >= '1') GROUP BY \"color\" ORDER BY frequency DESC, facet_value ASC LIMIT 100"
        );
        assert_eq!(
            model.columns()[1].facet_sql("syn123", None, 100),
            "SELECT MIN(\"size\") AS minimum, MAX(\"size\") AS maximum FROM syn123"
        );
    }

    #[test]
    fn test_translate_value_counts() {
        let model = FacetModel::new(&[values("color", &["red"])], &schema()).unwrap();
        let rows = vec![
            vec![Some("red".to_string()), Some("3".to_string())],
            vec![None, Some("1".to_string())],
        ];
        let result = model.columns()[0].translate_results(&rows).unwrap();
        assert_eq!(
            result,
            FacetColumnResult::Values {
                column_name: "color".into(),
                facet_values: vec![
                    FacetValueCount { value: "red".into(), count: 3, is_selected: true },
                    FacetValueCount { value: NULL_VALUE_KEYWORD.into(), count: 1, is_selected: false },
                ],
            }
        );
    }

    #[test]
    fn test_translate_range() {
        let request = FacetColumnRequest::Range {
            column_name: "size".into(),
            min: Some("2".into()),
            max: None,
        };
        let model = FacetModel::new(&[request], &schema()).unwrap();
        let rows = vec![vec![Some("1".to_string()), Some("9".to_string())]];
        let result = model.columns()[1].translate_results(&rows).unwrap();
        assert_eq!(
            result,
            FacetColumnResult::Range {
                column_name: "size".into(),
                column_min: Some("1".into()),
                column_max: Some("9".into()),
                selected_min: Some("2".into()),
                selected_max: None,
            }
        );
    }
}
