//! End-to-end query bundle tests over the in-memory collaborators

use std::collections::BTreeSet;
use std::sync::Arc;
use table_query_engine::config::EngineConfig;
use table_query_engine::error::QueryError;
use table_query_engine::execution::{
    PrincipalId, ProgressContext, QueryBundleRequest, QueryServices, TableQuery,
    TableQueryManager, TableState, TableStatus, BUNDLE_MASK_LAST_UPDATED_ON,
    BUNDLE_MASK_QUERY_COLUMN_MODELS, BUNDLE_MASK_QUERY_COUNT, BUNDLE_MASK_QUERY_FACETS,
    BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE, BUNDLE_MASK_QUERY_RESULTS,
    BUNDLE_MASK_QUERY_SELECT_COLUMNS, BUNDLE_MASK_SUM_FILE_SIZES,
};
use table_query_engine::index::InMemorySourceTableStore;
use table_query_engine::memory::{
    InMemoryAuthorizer, InMemoryTableIndex, InMemoryTableLocks, InMemoryTableStatus, IndexRow,
};
use table_query_engine::planner::{FacetColumnRequest, FacetColumnResult, FacetValueCount};
use table_query_engine::schema::{
    ColumnSchema, ColumnType, FacetType, InMemorySchemaResolver, ObjectType, TableIdentity,
    TableKind,
};

const CALLER: PrincipalId = PrincipalId(7);

struct Fixture {
    index: Arc<InMemoryTableIndex>,
    authorizer: Arc<InMemoryAuthorizer>,
    status: Arc<InMemoryTableStatus>,
    locks: Arc<InMemoryTableLocks>,
    manager: TableQueryManager,
}

/// syn123: entity view [foo, "has space", bar (range), color (enumeration)]
/// with rows under benefactors 10 and 20. syn200: plain table [n].
fn create_test_fixture() -> Fixture {
    let schemas = Arc::new(InMemorySchemaResolver::new());
    schemas.register_table(
        TableIdentity::new(123),
        TableKind::EntityView,
        vec![
            ColumnSchema::new(1, "foo", ColumnType::String).with_max_size(10),
            ColumnSchema::new(2, "has space", ColumnType::String).with_max_size(10),
            ColumnSchema::new(3, "bar", ColumnType::Integer).with_facet(FacetType::Range),
            ColumnSchema::new(4, "color", ColumnType::String)
                .with_max_size(10)
                .with_facet(FacetType::Enumeration),
        ],
    );
    schemas.register_table(
        TableIdentity::new(200),
        TableKind::Table,
        vec![ColumnSchema::new(9, "n", ColumnType::Integer)],
    );
    schemas.register_table(TableIdentity::new(404), TableKind::EntityView, vec![]);

    let index = Arc::new(InMemoryTableIndex::new());
    index.insert_rows(
        TableIdentity::new(123),
        vec![
            IndexRow::new(1, 1).benefactor(10).etag("e1").cell(1, "a").cell(2, "x").cell(3, "1").cell(4, "red"),
            IndexRow::new(2, 1).benefactor(10).etag("e2").cell(1, "b").cell(2, "y").cell(3, "2").cell(4, "blue"),
            IndexRow::new(3, 2).benefactor(20).etag("e3").cell(1, "c").cell(2, "z").cell(3, "1").cell(4, "red"),
            IndexRow::new(4, 1).benefactor(10).etag("e4").cell(1, "d").cell(3, "5").cell(4, "red"),
        ],
    );
    index.insert_rows(
        TableIdentity::new(200),
        (1..=5).map(|n| IndexRow::new(n, 1).cell(9, n.to_string())).collect(),
    );
    for (row_id, size) in [(1, 100), (2, 200), (3, 300), (4, 400)] {
        index.set_file_size(row_id, 1, size);
    }

    let authorizer = Arc::new(InMemoryAuthorizer::new());
    authorizer.grant(CALLER, ObjectType::Entity, [10]);

    let status = Arc::new(InMemoryTableStatus::new());
    status.set_available(TableIdentity::new(123));
    status.set_available(TableIdentity::new(200));

    let locks = Arc::new(InMemoryTableLocks::new());
    let services = QueryServices {
        schemas,
        sources: Arc::new(InMemorySourceTableStore::new()),
        index: index.clone(),
        authorizer: authorizer.clone(),
        status: status.clone(),
        locks: locks.clone(),
    };
    Fixture {
        index,
        authorizer,
        status,
        locks,
        manager: TableQueryManager::new(services, EngineConfig::default()),
    }
}

fn request(sql: &str, part_mask: u64) -> QueryBundleRequest {
    QueryBundleRequest {
        query: TableQuery::new(sql),
        part_mask: Some(part_mask),
        max_bytes_per_page: None,
    }
}

fn values(bundle_rows: &[table_query_engine::execution::Row]) -> Vec<Vec<Option<String>>> {
    bundle_rows.iter().map(|r| r.values.clone()).collect()
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

#[test]
fn test_select_star_returns_visible_rows() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request("select * from syn123", BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_SELECT_COLUMNS),
        )
        .unwrap();

    let result = bundle.query_result.unwrap();
    assert_eq!(result.query_results.table_id, "syn123");
    let headers: Vec<&str> = result.query_results.headers.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(headers, vec!["foo", "has space", "bar", "color"]);
    assert_eq!(
        values(&result.query_results.rows),
        vec![
            vec![text("a"), text("x"), text("1"), text("red")],
            vec![text("b"), text("y"), text("2"), text("blue")],
            vec![text("d"), None, text("5"), text("red")],
        ]
    );
    let first = &result.query_results.rows[0];
    assert_eq!(first.row_id, Some(1));
    assert_eq!(first.version_number, Some(1));
    assert_eq!(first.etag, None);
    assert!(result.next_page_token.is_none());
    assert_eq!(bundle.select_columns.unwrap().len(), 4);
    assert!(bundle.query_count.is_none());
}

#[test]
fn test_fully_authorized_caller_sees_every_row() {
    let fixture = create_test_fixture();
    let admin = PrincipalId(1);
    fixture.authorizer.grant(admin, ObjectType::Entity, [10, 20]);
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            admin,
            &request("select foo, \"has space\" from syn123", BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_COUNT),
        )
        .unwrap();
    let result = bundle.query_result.unwrap().query_results;
    assert_eq!(result.rows.len(), 4);
    let headers: Vec<&str> = result.headers.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(headers, vec!["foo", "has space"]);
    assert_eq!(bundle.query_count, Some(4));
}

#[test]
fn test_or_in_where_cannot_widen_access() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request(
                "select foo from syn123 where bar = 1 or bar = 2",
                BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_COUNT,
            ),
        )
        .unwrap();
    let rows = bundle.query_result.unwrap().query_results.rows;
    assert_eq!(values(&rows), vec![vec![text("a")], vec![text("b")]]);
    assert_eq!(bundle.query_count, Some(2));
}

#[test]
fn test_no_accessible_benefactors_returns_nothing() {
    let fixture = create_test_fixture();
    let stranger = PrincipalId(99);
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            stranger,
            &request("select foo from syn123", BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_COUNT),
        )
        .unwrap();
    assert!(bundle.query_result.unwrap().query_results.rows.is_empty());
    assert_eq!(bundle.query_count, Some(0));
    assert_eq!(fixture.authorizer.calls(), 1);
}

#[test]
fn test_include_entity_etag() {
    let fixture = create_test_fixture();
    let mut query = TableQuery::new("select foo from syn123 where foo = 'a'");
    query.include_entity_etag = true;
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &QueryBundleRequest {
                query,
                part_mask: None,
                max_bytes_per_page: None,
            },
        )
        .unwrap();
    let rows = bundle.query_result.unwrap().query_results.rows;
    assert_eq!(rows[0].etag.as_deref(), Some("e1"));
}

#[test]
fn test_count_respects_text_limit_only() {
    let fixture = create_test_fixture();
    let mut query = TableQuery::new("select n from syn200 limit 4 offset 1");
    query.limit = Some(1);
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &QueryBundleRequest {
                query,
                part_mask: Some(BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_COUNT),
                max_bytes_per_page: None,
            },
        )
        .unwrap();
    let rows = bundle.query_result.unwrap().query_results.rows;
    assert_eq!(values(&rows), vec![vec![text("2")]]);
    assert_eq!(bundle.query_count, Some(4));
}

#[test]
fn test_aggregate_count_is_one() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request("select count(*), max(n) from syn200", BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_COUNT),
        )
        .unwrap();
    let rows = bundle.query_result.unwrap().query_results.rows;
    assert_eq!(values(&rows), vec![vec![text("5"), text("5")]]);
    assert_eq!(rows[0].row_id, None);
    assert_eq!(bundle.query_count, Some(1));
}

#[test]
fn test_count_with_largest_bounds() {
    let fixture = create_test_fixture();
    let count = |sql: &str| {
        fixture
            .manager
            .query_bundle(&ProgressContext::default(), CALLER, &request(sql, BUNDLE_MASK_QUERY_COUNT))
            .map(|bundle| bundle.query_count)
    };
    assert_eq!(count("select n from syn200 limit 9223372036854775807").unwrap(), Some(5));
    assert_eq!(
        count("select n from syn200 limit 10 offset 9223372036854775807").unwrap(),
        Some(0)
    );
    assert!(matches!(
        count("select n from syn200 limit 18446744073709551615"),
        Err(QueryError::InvalidArgument(_))
    ));
    assert!(matches!(
        count("select n from syn200 limit 10 offset 9223372036854775808"),
        Err(QueryError::InvalidArgument(_))
    ));
}

#[test]
fn test_subqueries_cannot_reach_other_tables() {
    let fixture = create_test_fixture();
    for sql in [
        "select foo from syn123 where foo in (select n from T200)",
        "select foo from syn123 where exists (select ROW_ID from T123 where ROW_BENEFACTOR = 20)",
        "with x as (select ROW_ID from T200) select foo from syn123",
    ] {
        let result = fixture.manager.query_preflight(
            &ProgressContext::default(),
            CALLER,
            &TableQuery::new(sql),
            None,
        );
        assert!(matches!(result, Err(QueryError::InvalidArgument(_))), "{}", sql);
    }
}

#[test]
fn test_facets() {
    let fixture = create_test_fixture();
    let mut query = TableQuery::new("select foo from syn123");
    query.selected_facets = vec![FacetColumnRequest::Values {
        column_name: "color".into(),
        facet_values: BTreeSet::from(["red".to_string()]),
    }];
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &QueryBundleRequest {
                query,
                part_mask: Some(BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_FACETS),
                max_bytes_per_page: None,
            },
        )
        .unwrap();

    let rows = bundle.query_result.unwrap().query_results.rows;
    assert_eq!(values(&rows), vec![vec![text("a")], vec![text("d")]]);

    let facets = bundle.facets.unwrap();
    assert_eq!(
        facets,
        vec![
            FacetColumnResult::Range {
                column_name: "bar".into(),
                column_min: text("1"),
                column_max: text("5"),
                selected_min: None,
                selected_max: None,
            },
            FacetColumnResult::Values {
                column_name: "color".into(),
                facet_values: vec![
                    FacetValueCount {
                        value: "red".into(),
                        count: 2,
                        is_selected: true,
                    },
                    FacetValueCount {
                        value: "blue".into(),
                        count: 1,
                        is_selected: false,
                    },
                ],
            },
        ]
    );
}

#[test]
fn test_range_facet_selection_narrows_other_facets() {
    let fixture = create_test_fixture();
    let mut query = TableQuery::new("select foo from syn123");
    query.selected_facets = vec![FacetColumnRequest::Range {
        column_name: "bar".into(),
        min: Some("2".into()),
        max: None,
    }];
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &QueryBundleRequest {
                query,
                part_mask: Some(BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_FACETS),
                max_bytes_per_page: None,
            },
        )
        .unwrap();

    let rows = bundle.query_result.unwrap().query_results.rows;
    assert_eq!(values(&rows), vec![vec![text("b")], vec![text("d")]]);
    let facets = bundle.facets.unwrap();
    match &facets[0] {
        FacetColumnResult::Range {
            column_min,
            selected_min,
            ..
        } => {
            // the range facet ignores its own selection
            assert_eq!(column_min.as_deref(), Some("1"));
            assert_eq!(selected_min.as_deref(), Some("2"));
        }
        other => panic!("unexpected {:?}", other),
    }
    match &facets[1] {
        FacetColumnResult::Values { facet_values, .. } => {
            let counts: Vec<(&str, i64)> = facet_values.iter().map(|v| (v.value.as_str(), v.count)).collect();
            assert_eq!(counts, vec![("blue", 1), ("red", 1)]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_sum_file_sizes() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request("select foo from syn123", BUNDLE_MASK_SUM_FILE_SIZES),
        )
        .unwrap();
    let sums = bundle.sum_file_sizes.unwrap();
    assert_eq!(sums.sum_file_size_bytes, 100 + 200 + 400);
    assert!(!sums.greater_than);
    assert!(bundle.query_result.is_none());

    let table = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request("select n from syn200", BUNDLE_MASK_SUM_FILE_SIZES),
        )
        .unwrap();
    assert_eq!(table.sum_file_sizes.unwrap().sum_file_size_bytes, 0);
}

#[test]
fn test_metadata_parts() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request(
                "select foo, bar from syn123",
                BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE | BUNDLE_MASK_QUERY_COLUMN_MODELS | BUNDLE_MASK_LAST_UPDATED_ON,
            ),
        )
        .unwrap();
    // foo is 40 bytes, bar 20
    assert_eq!(bundle.max_rows_per_page, Some(10_000_000 / 60));
    assert_eq!(bundle.column_models.unwrap().len(), 4);
    assert!(bundle.last_updated_on.is_some());
    assert!(bundle.query_result.is_none());
}

#[test]
fn test_paging_with_tokens() {
    let fixture = create_test_fixture();
    let ctx = ProgressContext::default();
    let first = fixture
        .manager
        .query_bundle(
            &ctx,
            CALLER,
            &QueryBundleRequest {
                query: TableQuery::new("select n from syn200 order by n"),
                part_mask: None,
                max_bytes_per_page: Some(40),
            },
        )
        .unwrap()
        .query_result
        .unwrap();
    assert_eq!(values(&first.query_results.rows), vec![vec![text("1")], vec![text("2")]]);

    let token = first.next_page_token.unwrap();
    let second = fixture.manager.query_next_page(&ctx, CALLER, &token).unwrap();
    assert_eq!(values(&second.query_results.rows), vec![vec![text("3")], vec![text("4")]]);

    let third = fixture
        .manager
        .query_next_page(&ctx, CALLER, &second.next_page_token.unwrap())
        .unwrap();
    assert_eq!(values(&third.query_results.rows), vec![vec![text("5")]]);
    assert!(third.next_page_token.is_none());
}

#[test]
fn test_paging_stops_at_text_limit() {
    let fixture = create_test_fixture();
    let ctx = ProgressContext::default();
    let first = fixture
        .manager
        .query_bundle(
            &ctx,
            CALLER,
            &QueryBundleRequest {
                query: TableQuery::new("select n from syn200 order by n limit 3"),
                part_mask: None,
                max_bytes_per_page: Some(40),
            },
        )
        .unwrap()
        .query_result
        .unwrap();
    assert_eq!(first.query_results.rows.len(), 2);

    let second = fixture
        .manager
        .query_next_page(&ctx, CALLER, &first.next_page_token.unwrap())
        .unwrap();
    assert_eq!(values(&second.query_results.rows), vec![vec![text("3")]]);
    assert!(second.next_page_token.is_none());
}

#[test]
fn test_empty_schema_bundle() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request("select * from syn404", BUNDLE_MASK_QUERY_RESULTS | BUNDLE_MASK_QUERY_COUNT | BUNDLE_MASK_QUERY_MAX_ROWS_PER_PAGE),
        )
        .unwrap();
    let result = bundle.query_result.unwrap();
    assert_eq!(result.query_results.table_id, "syn404");
    assert!(result.query_results.rows.is_empty());
    assert_eq!(bundle.query_count, Some(0));
    assert_eq!(bundle.max_rows_per_page, Some(1));
    assert!(bundle.facets.is_none());
}

#[test]
fn test_empty_mask_returns_empty_bundle() {
    let fixture = create_test_fixture();
    let bundle = fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select * from syn123", 0))
        .unwrap();
    assert_eq!(bundle, Default::default());
}

#[test]
fn test_unavailable_table_is_retryable() {
    let fixture = create_test_fixture();
    fixture.status.set_status(
        TableIdentity::new(123),
        TableStatus::new("syn123", TableState::Processing),
    );
    let err = fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select foo from syn123", BUNDLE_MASK_QUERY_RESULTS))
        .unwrap_err();
    assert!(matches!(err, QueryError::TableUnavailable(_)));
    assert!(err.is_retryable());

    // metadata-only parts never look at the index
    let bundle = fixture
        .manager
        .query_bundle(
            &ProgressContext::default(),
            CALLER,
            &request("select foo from syn123", BUNDLE_MASK_QUERY_SELECT_COLUMNS),
        )
        .unwrap();
    assert_eq!(bundle.select_columns.unwrap().len(), 1);
}

#[test]
fn test_failed_table() {
    let fixture = create_test_fixture();
    fixture.status.set_status(
        TableIdentity::new(123),
        TableStatus::new("syn123", TableState::ProcessingFailed).with_error_message("bad"),
    );
    let err = fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select foo from syn123", BUNDLE_MASK_QUERY_RESULTS))
        .unwrap_err();
    assert!(matches!(err, QueryError::TableFailed(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_exclusive_lock_blocks_query() {
    let fixture = create_test_fixture();
    let rebuild = fixture.locks.acquire_exclusive(&TableIdentity::new(123)).unwrap();
    let err = fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select foo from syn123", BUNDLE_MASK_QUERY_RESULTS))
        .unwrap_err();
    assert!(matches!(err, QueryError::LockUnavailable(_)));
    drop(rebuild);

    assert!(fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select foo from syn123", BUNDLE_MASK_QUERY_RESULTS))
        .is_ok());
    assert_eq!(fixture.locks.holders(&TableIdentity::new(123)), 0);
}

#[test]
fn test_unreadable_table() {
    let fixture = create_test_fixture();
    fixture.authorizer.deny_read(CALLER, TableIdentity::new(123));
    let err = fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select foo from syn123", BUNDLE_MASK_QUERY_RESULTS))
        .unwrap_err();
    assert!(matches!(err, QueryError::Unauthorized(_)));
}

#[test]
fn test_stream_rows_holds_lock_until_exhausted() {
    let fixture = create_test_fixture();
    let ctx = ProgressContext::default();
    let query = fixture
        .manager
        .query_preflight(&ctx, CALLER, &TableQuery::new("select foo from syn123"), None)
        .unwrap();
    let table = TableIdentity::new(123);

    let mut stream = fixture.manager.stream_rows(&ctx, &query).unwrap();
    assert!(stream.holds_lock());
    assert_eq!(fixture.locks.holders(&table), 1);

    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.values, vec![text("a")]);
    let rest: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();
    assert_eq!(rest.len(), 2);
    assert!(!stream.holds_lock());
    assert_eq!(fixture.locks.holders(&table), 0);
}

#[test]
fn test_missing_index_table_surfaces_on_query() {
    let fixture = create_test_fixture();
    fixture.index.drop_table(&TableIdentity::new(200));
    let err = fixture
        .manager
        .query_bundle(&ProgressContext::default(), CALLER, &request("select n from syn200", BUNDLE_MASK_QUERY_RESULTS))
        .unwrap_err();
    assert!(matches!(err, QueryError::Execution(_)));
}
