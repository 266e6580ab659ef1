//! Query compilation benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeSet;
use table_query_engine::index::{IndexDescriptionResolver, InMemorySourceTableStore};
use table_query_engine::memory::InMemoryTableIndex;
use table_query_engine::planner::{BenefactorRestriction, RowFilter, SqlQueryBuilder};
use table_query_engine::schema::{
    ColumnSchema, ColumnType, FacetType, InMemorySchemaResolver, TableIdentity, TableKind,
};

const QUERIES: &[(&str, &str)] = &[
    ("select_star", "select * from syn123"),
    ("filtered", "select c1, c2 from syn123 where c3 > 10 and (c4 = 'a' or c4 like 'b%') order by c1 desc"),
    ("aggregate", "select c4, count(*), max(c3) from syn123 group by c4 having count(*) > 1"),
    ("list_has", "select c1 from syn123 where c5 has ('x', 'y')"),
];

fn create_schemas() -> InMemorySchemaResolver {
    let schemas = InMemorySchemaResolver::new();
    schemas.register_table(
        TableIdentity::new(123),
        TableKind::EntityView,
        vec![
            ColumnSchema::new(1, "c1", ColumnType::String),
            ColumnSchema::new(2, "c2", ColumnType::Double),
            ColumnSchema::new(3, "c3", ColumnType::Integer).with_facet(FacetType::Range),
            ColumnSchema::new(4, "c4", ColumnType::String).with_facet(FacetType::Enumeration),
            ColumnSchema::new(5, "c5", ColumnType::StringList),
        ],
    );
    schemas
}

fn benchmark_compile(c: &mut Criterion) {
    let schemas = create_schemas();
    let sources = InMemorySourceTableStore::new();
    let index = InMemoryTableIndex::new();
    let descriptions = IndexDescriptionResolver::new(&schemas, &sources);
    let row_filter = RowFilter {
        restrictions: vec![BenefactorRestriction::new(
            "ROW_BENEFACTOR",
            (0..100).collect::<BTreeSet<i64>>(),
        )],
    };

    let mut group = c.benchmark_group("compile");
    for (name, sql) in QUERIES {
        group.bench_with_input(BenchmarkId::new("build", name), sql, |b, sql| {
            b.iter(|| {
                let query = SqlQueryBuilder::new(sql, &schemas)
                    .index_descriptions(&descriptions)
                    .table_index(&index)
                    .max_bytes_per_page(Some(1_000_000))
                    .build()
                    .unwrap();
                black_box(query.output_sql().len());
            });
        });

        let query = SqlQueryBuilder::new(sql, &schemas)
            .index_descriptions(&descriptions)
            .table_index(&index)
            .build()
            .unwrap();
        group.bench_with_input(BenchmarkId::new("secure", name), &query, |b, query| {
            b.iter(|| {
                let secured = query.with_row_filter(Some(row_filter.clone())).unwrap();
                black_box(secured.parameters().len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_compile);
criterion_main!(benches);
