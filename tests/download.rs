//! Query downloads over the in-memory collaborators

use std::sync::Arc;
use table_query_engine::config::EngineConfig;
use table_query_engine::error::QueryError;
use table_query_engine::execution::{
    DownloadRequest, PrincipalId, ProgressContext, QueryServices, TableQueryManager,
};
use table_query_engine::index::InMemorySourceTableStore;
use table_query_engine::memory::{
    InMemoryAuthorizer, InMemoryTableIndex, InMemoryTableLocks, InMemoryTableStatus, IndexRow,
};
use table_query_engine::schema::{
    ColumnSchema, ColumnType, InMemorySchemaResolver, ObjectType, TableIdentity, TableKind,
};

const CALLER: PrincipalId = PrincipalId(7);

struct Fixture {
    locks: Arc<InMemoryTableLocks>,
    manager: TableQueryManager,
}

fn create_test_fixture() -> Fixture {
    create_test_fixture_with(EngineConfig::default())
}

/// syn123: entity view [i0, foo] with three readable rows and one hidden.
/// syn200: table [i0, foo] with ten rows. syn404: no columns.
fn create_test_fixture_with(config: EngineConfig) -> Fixture {
    let columns = vec![
        ColumnSchema::new(1, "i0", ColumnType::Integer),
        ColumnSchema::new(2, "foo", ColumnType::String).with_max_size(20),
    ];
    let schemas = Arc::new(InMemorySchemaResolver::new());
    schemas.register_table(TableIdentity::new(123), TableKind::EntityView, columns.clone());
    schemas.register_table(TableIdentity::new(200), TableKind::Table, columns);
    schemas.register_table(TableIdentity::new(404), TableKind::Table, vec![]);

    let index = Arc::new(InMemoryTableIndex::new());
    index.insert_rows(
        TableIdentity::new(123),
        vec![
            IndexRow::new(0, 101).benefactor(10).etag("etag-0").cell(1, "0").cell(2, "string0"),
            IndexRow::new(1, 101).benefactor(10).etag("etag-1").cell(1, "1").cell(2, "string1"),
            IndexRow::new(2, 102).benefactor(20).etag("etag-2").cell(1, "2").cell(2, "string2"),
            IndexRow::new(3, 101).benefactor(10).etag("etag-3").cell(1, "3"),
        ],
    );
    index.insert_rows(
        TableIdentity::new(200),
        (0..10)
            .map(|n| {
                IndexRow::new(n, 101)
                    .cell(1, n.to_string())
                    .cell(2, format!("string{}", n))
            })
            .collect(),
    );

    let authorizer = Arc::new(InMemoryAuthorizer::new());
    authorizer.grant(CALLER, ObjectType::Entity, [10]);
    let status = Arc::new(InMemoryTableStatus::new());
    status.set_available(TableIdentity::new(123));
    status.set_available(TableIdentity::new(200));
    let locks = Arc::new(InMemoryTableLocks::new());

    let services = QueryServices {
        schemas,
        sources: Arc::new(InMemorySourceTableStore::new()),
        index,
        authorizer,
        status,
        locks: locks.clone(),
    };
    Fixture {
        locks,
        manager: TableQueryManager::new(services, config),
    }
}

impl Fixture {
    fn download(&self, request: &DownloadRequest) -> Result<Vec<Vec<String>>, QueryError> {
        let mut lines: Vec<Vec<String>> = Vec::new();
        self.manager
            .run_query_download_as_stream(&ProgressContext::default(), CALLER, request, &mut lines)?;
        Ok(lines)
    }
}

#[test]
fn test_download_all_rows_with_header() {
    let fixture = create_test_fixture();
    let mut request = DownloadRequest::new("select * from syn200");
    request.include_row_id_and_row_version = false;

    let mut lines: Vec<Vec<String>> = Vec::new();
    let result = fixture
        .manager
        .run_query_download_as_stream(&ProgressContext::default(), CALLER, &request, &mut lines)
        .unwrap();

    assert_eq!(lines.len(), 11);
    assert_eq!(lines[0], vec!["i0", "foo"]);
    assert_eq!(lines[1], vec!["0", "string0"]);
    assert_eq!(result.table_id, "syn200");
    assert_eq!(result.rows_written, 10);
    let headers: Vec<&str> = result.headers.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(headers, vec!["i0", "foo"]);
    assert_eq!(fixture.locks.holders(&TableIdentity::new(200)), 0);
}

#[test]
fn test_download_is_not_paged() {
    let config = EngineConfig {
        max_bytes_per_request: 1,
        ..EngineConfig::default()
    };
    let fixture = create_test_fixture_with(config);
    let lines = fixture
        .download(&DownloadRequest::new("select foo from syn200"))
        .unwrap();
    assert_eq!(lines.len(), 11);
}

#[test]
fn test_download_default_values() {
    let fixture = create_test_fixture();
    let request: DownloadRequest = serde_json::from_str(r#"{"sql": "select foo from syn200"}"#).unwrap();
    let lines = fixture.download(&request).unwrap();
    assert_eq!(lines[0], vec!["ROW_ID", "ROW_VERSION", "foo"]);
    assert_eq!(lines[1], vec!["0", "101", "string0"]);
}

#[test]
fn test_download_view_includes_etag() {
    let fixture = create_test_fixture();
    let mut request = DownloadRequest::new("select foo from syn123");
    request.include_entity_etag = true;
    let lines = fixture.download(&request).unwrap();
    assert_eq!(
        lines,
        vec![
            vec!["ROW_ID", "ROW_VERSION", "ROW_ETAG", "foo"],
            vec!["0", "101", "etag-0", "string0"],
            vec!["1", "101", "etag-1", "string1"],
            vec!["3", "101", "etag-3", ""],
        ]
    );
}

#[test]
fn test_download_table_ignores_etag() {
    let fixture = create_test_fixture();
    let mut request = DownloadRequest::new("select foo from syn200");
    request.include_entity_etag = true;
    let lines = fixture.download(&request).unwrap();
    assert_eq!(lines[0], vec!["ROW_ID", "ROW_VERSION", "foo"]);
    assert_eq!(lines[1], vec!["0", "101", "string0"]);
}

#[test]
fn test_download_etag_without_row_ids() {
    let fixture = create_test_fixture();
    let mut request = DownloadRequest::new("select foo from syn123");
    request.include_row_id_and_row_version = false;
    request.include_entity_etag = true;
    request.write_header = true;
    let lines = fixture.download(&request).unwrap();
    assert_eq!(lines[0], vec!["foo"]);
    assert_eq!(lines[1], vec!["string0"]);
}

#[test]
fn test_download_without_header() {
    let fixture = create_test_fixture();
    let mut request = DownloadRequest::new("select i0 from syn200 where i0 < 2");
    request.write_header = false;
    let lines = fixture.download(&request).unwrap();
    assert_eq!(lines, vec![vec!["0", "101", "0"], vec!["1", "101", "1"]]);
}

#[test]
fn test_download_empty_schema_is_invalid() {
    let fixture = create_test_fixture();
    let err = fixture
        .download(&DownloadRequest::new("select * from syn404"))
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgument(_)), "{:?}", err);
}

#[test]
fn test_download_to_csv() {
    let fixture = create_test_fixture();
    let mut request = DownloadRequest::new("select i0, foo from syn200 where i0 = 4");
    request.include_row_id_and_row_version = false;
    let mut writer = csv::Writer::from_writer(Vec::new());
    fixture
        .manager
        .run_query_download_as_stream(&ProgressContext::default(), CALLER, &request, &mut writer)
        .unwrap();
    writer.flush().unwrap();
    assert_eq!(String::from_utf8_lossy(writer.get_ref()), "i0,foo\n4,string4\n");
}
