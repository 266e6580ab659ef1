//! Row-level security
//!
//! Restricts a query to the benefactors the caller can read. The caller's
//! WHERE clause is parenthesized as a whole before the restriction is ANDed
//! on, so an OR in it can never widen the result.

use crate::error::Result;
use crate::execution::{Authorizer, PrincipalId, ProgressContext, TableIndex};
use crate::index::IndexDescription;
use crate::parser::{and, nested, select_of_mut, Expr, Ident, Query, Value};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Matches no real row
pub const UNMATCHABLE_BENEFACTOR: i64 = -1;

/// `<column_name> IN (<benefactor_ids>)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenefactorRestriction {
    pub column_name: String,
    pub benefactor_ids: BTreeSet<i64>,
}

impl BenefactorRestriction {
    /// An empty id set becomes the unmatchable sentinel.
    pub fn new(column_name: impl Into<String>, benefactor_ids: BTreeSet<i64>) -> Self {
        let benefactor_ids = if benefactor_ids.is_empty() {
            BTreeSet::from([UNMATCHABLE_BENEFACTOR])
        } else {
            benefactor_ids
        };
        Self {
            column_name: column_name.into(),
            benefactor_ids,
        }
    }

    /// Each id is a single literal, so the sentinel binds as one `-1`.
    pub fn to_expr(&self) -> Expr {
        Expr::InList {
            expr: Box::new(Expr::Identifier(Ident::new(&self.column_name))),
            list: self
                .benefactor_ids
                .iter()
                .map(|id| Expr::Value(Value::Number(id.to_string(), false)))
                .collect(),
            negated: false,
        }
    }
}

/// Every restriction applies; one per benefactor column of the index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    pub restrictions: Vec<BenefactorRestriction>,
}

impl RowFilter {
    pub fn is_empty(&self) -> bool {
        self.restrictions.is_empty()
    }
}

/// The query with its WHERE rewritten to `(<where>) AND <restriction> ...`
pub fn apply_row_filter(query: &Query, filter: &RowFilter) -> Result<Query> {
    let mut secured = query.clone();
    let select = select_of_mut(&mut secured)?;
    let mut predicate = select.selection.take().map(nested);
    for restriction in &filter.restrictions {
        let restriction = restriction.to_expr();
        predicate = Some(match predicate {
            Some(existing) => and(existing, restriction),
            None => restriction,
        });
    }
    select.selection = predicate;
    Ok(secured)
}

/// Restriction to the benefactors the caller can read. None when the index
/// has no benefactor columns.
///
/// A failed read of the index's benefactor ids counts as no ids: a table that
/// is not built yet has no rows to show.
pub fn build_row_filter(
    ctx: &ProgressContext,
    caller: PrincipalId,
    description: &IndexDescription,
    index: &dyn TableIndex,
    authorizer: &dyn Authorizer,
) -> Result<Option<RowFilter>> {
    let benefactors = description.benefactors();
    if benefactors.is_empty() {
        return Ok(None);
    }

    let mut restrictions = Vec::with_capacity(benefactors.len());
    for benefactor in benefactors {
        ctx.progress()?;
        let candidates = index
            .distinct_long_values(description.table_id(), &benefactor.column_name)
            .unwrap_or_else(|e| {
                warn!(
                    table_id = %description.table_id(),
                    column = %benefactor.column_name,
                    error = %e,
                    "Could not read benefactors, treating as empty"
                );
                BTreeSet::new()
            });
        let accessible = if candidates.is_empty() {
            BTreeSet::new()
        } else {
            authorizer.accessible_benefactors(caller, benefactor.object_type, &candidates)?
        };
        debug!(
            column = %benefactor.column_name,
            candidates = candidates.len(),
            accessible = accessible.len(),
            "Computed benefactor restriction"
        );
        restrictions.push(BenefactorRestriction::new(benefactor.column_name, accessible));
    }
    Ok(Some(RowFilter { restrictions }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::execution::CancellationFlag;
    use crate::memory::{InMemoryAuthorizer, InMemoryTableIndex, IndexRow};
    use crate::parser::parse_query;
    use crate::schema::{ObjectType, TableIdentity, TableKind};
    use std::sync::Arc;

    fn restriction(ids: &[i64]) -> RowFilter {
        RowFilter {
            restrictions: vec![BenefactorRestriction::new(
                "ROW_BENEFACTOR",
                ids.iter().copied().collect(),
            )],
        }
    }

    fn secured(sql: &str, filter: &RowFilter) -> String {
        let query = parse_query(sql).unwrap();
        apply_row_filter(&query, filter).unwrap().to_string()
    }

    #[test]
    fn test_where_with_or_is_parenthesized() {
        assert_eq!(
            secured("select * from syn123 where a = 1 or b = 2", &restriction(&[3, 4])),
            "SELECT * FROM syn123 WHERE (a = 1 OR b = 2) AND ROW_BENEFACTOR IN (3, 4)"
        );
    }

    #[test]
    fn test_no_where() {
        assert_eq!(
            secured("select * from syn123", &restriction(&[3])),
            "SELECT * FROM syn123 WHERE ROW_BENEFACTOR IN (3)"
        );
    }

    #[test]
    fn test_empty_accessible_set_matches_nothing() {
        assert_eq!(
            secured("select * from syn123", &restriction(&[])),
            "SELECT * FROM syn123 WHERE ROW_BENEFACTOR IN (-1)"
        );
    }

    #[test]
    fn test_multiple_restrictions() {
        let filter = RowFilter {
            restrictions: vec![
                BenefactorRestriction::new("ROW_BENEFACTOR_T1", BTreeSet::from([7])),
                BenefactorRestriction::new("ROW_BENEFACTOR_T2", BTreeSet::from([8])),
            ],
        };
        assert_eq!(
            secured("select * from syn3 where x > 1", &filter),
            "SELECT * FROM syn3 WHERE (x > 1) AND ROW_BENEFACTOR_T1 IN (7) AND ROW_BENEFACTOR_T2 IN (8)"
        );
    }

    #[test]
    fn test_empty_filter_leaves_where() {
        assert_eq!(
            secured("select * from syn3 where x > 1", &RowFilter::default()),
            "SELECT * FROM syn3 WHERE (x > 1)"
        );
    }

    #[test]
    fn test_build_row_filter_for_table_is_none() {
        let index = InMemoryTableIndex::new();
        let authorizer = InMemoryAuthorizer::new();
        let description = IndexDescription::table(TableIdentity::new(1));
        let filter = build_row_filter(
            &ProgressContext::default(),
            PrincipalId(1),
            &description,
            &index,
            &authorizer,
        )
        .unwrap();
        assert!(filter.is_none());
    }

    #[test]
    fn test_build_row_filter_intersects_accessible() {
        let table = TableIdentity::new(1);
        let index = InMemoryTableIndex::new();
        index.insert_rows(
            table,
            vec![
                IndexRow::new(1, 1).benefactor(10),
                IndexRow::new(2, 1).benefactor(20),
                IndexRow::new(3, 1).benefactor(30),
            ],
        );
        let authorizer = InMemoryAuthorizer::new();
        authorizer.grant(PrincipalId(5), ObjectType::Entity, [20, 30, 40]);

        let description = IndexDescription::view(table, TableKind::EntityView);
        let filter = build_row_filter(
            &ProgressContext::default(),
            PrincipalId(5),
            &description,
            &index,
            &authorizer,
        )
        .unwrap()
        .unwrap();
        assert_eq!(filter, restriction(&[20, 30]));
    }

    #[test]
    fn test_missing_index_table_fails_safe() {
        let index = InMemoryTableIndex::new();
        let authorizer = InMemoryAuthorizer::new();
        let description = IndexDescription::view(TableIdentity::new(99), TableKind::EntityView);
        let filter = build_row_filter(
            &ProgressContext::default(),
            PrincipalId(5),
            &description,
            &index,
            &authorizer,
        )
        .unwrap()
        .unwrap();
        assert_eq!(filter, restriction(&[UNMATCHABLE_BENEFACTOR]));
        assert_eq!(authorizer.calls(), 0);
    }

    #[test]
    fn test_cancelled() {
        let index = InMemoryTableIndex::new();
        let authorizer = InMemoryAuthorizer::new();
        let description = IndexDescription::view(TableIdentity::new(1), TableKind::EntityView);
        let flag = Arc::new(CancellationFlag::default());
        flag.cancel();
        let result = build_row_filter(
            &ProgressContext::new(flag),
            PrincipalId(5),
            &description,
            &index,
            &authorizer,
        );
        assert!(matches!(result, Err(QueryError::Cancelled)));
    }
}
