//! Table query CLI

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use table_query_engine::execution::PrincipalId;
use table_query_engine::index::{
    IndexDescriptionProvider, IndexDescriptionResolver, InMemorySourceTableStore,
    MaterializedViewDependencyManager,
};
use table_query_engine::memory::InMemoryTableIndex;
use table_query_engine::planner::{SortDirection, SortItem, SqlQueryBuilder};
use table_query_engine::schema::{ColumnSchema, InMemorySchemaResolver, TableIdentity, TableKind};
use table_query_engine::{QueryError, Result};

#[derive(Parser)]
#[command(name = "tablequery")]
#[command(about = "Compile table queries and inspect index definitions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a query into backing-index SQL
    Compile {
        /// JSON catalog of table schemas
        #[arg(short, long)]
        catalog: PathBuf,

        /// Sort override, `column:asc` or `column:desc`. Repeatable.
        #[arg(short, long, value_parser = parse_sort_item)]
        sort: Vec<SortItem>,

        /// Calling principal
        #[arg(long, default_value = "0")]
        caller: i64,

        /// SQL query string
        sql: String,
    },

    /// Print the CREATE TABLE statement for a table's index
    Ddl {
        /// JSON catalog of table schemas
        #[arg(short, long)]
        catalog: PathBuf,

        /// Table identity, e.g. syn123
        table: String,
    },

    /// Print the source tables of a materialized view's defining SQL
    Sources {
        /// Defining SQL
        sql: String,
    },
}

/// One table of a catalog file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogTable {
    id: TableIdentity,
    kind: TableKind,
    #[serde(default)]
    columns: Vec<ColumnSchema>,
    /// Materialized views only
    #[serde(default)]
    defining_sql: Option<String>,
    #[serde(default)]
    search_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tables: Vec<CatalogTable>,
}

/// Collaborators loaded from a catalog file
struct Catalog {
    schemas: InMemorySchemaResolver,
    sources: InMemorySourceTableStore,
    index: InMemoryTableIndex,
}

impl Catalog {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            QueryError::InvalidArgument(format!("Cannot read catalog {}: {}", path.display(), e))
        })?;
        let file: CatalogFile = serde_json::from_str(&text)?;

        let catalog = Catalog {
            schemas: InMemorySchemaResolver::new(),
            sources: InMemorySourceTableStore::new(),
            index: InMemoryTableIndex::new(),
        };
        for table in file.tables {
            catalog.schemas.register_table(table.id, table.kind, table.columns);
            if table.search_enabled {
                catalog.index.enable_search(table.id);
            }
            if let Some(sql) = &table.defining_sql {
                MaterializedViewDependencyManager::validate(sql)?;
                MaterializedViewDependencyManager::new(&catalog.sources)
                    .register_source_tables(&table.id, sql)?;
            }
        }
        Ok(catalog)
    }

    fn descriptions(&self) -> IndexDescriptionResolver<'_> {
        IndexDescriptionResolver::new(&self.schemas, &self.sources)
    }
}

fn parse_sort_item(text: &str) -> std::result::Result<SortItem, String> {
    let (column, direction) = match text.rsplit_once(':') {
        Some((column, direction)) => (column, Some(direction)),
        None => (text, None),
    };
    let direction = match direction.map(|d| d.to_ascii_lowercase()).as_deref() {
        None => None,
        Some("asc") => Some(SortDirection::Asc),
        Some("desc") => Some(SortDirection::Desc),
        Some(other) => return Err(format!("Unknown sort direction '{}'", other)),
    };
    Ok(SortItem::new(column, direction))
}

fn compile(catalog: &Path, sort: Vec<SortItem>, caller: i64, sql: &str) -> Result<()> {
    let catalog = Catalog::load(catalog)?;
    let descriptions = catalog.descriptions();
    let query = SqlQueryBuilder::new(sql, &catalog.schemas)
        .caller(PrincipalId(caller))
        .index_descriptions(&descriptions)
        .table_index(&catalog.index)
        .sort(sort)
        .build()?;

    println!("{}", query.output_sql());
    for (name, value) in query.parameters() {
        println!(":{} = {}", name, value);
    }
    Ok(())
}

fn ddl(catalog: &Path, table: &str) -> Result<()> {
    let catalog = Catalog::load(catalog)?;
    let table_id = TableIdentity::parse(table)?;
    let description = catalog.descriptions().index_description(&table_id)?;
    println!("{}", description.create_or_update_index_sql());
    Ok(())
}

fn sources(sql: &str) -> Result<()> {
    let tables: BTreeSet<TableIdentity> = MaterializedViewDependencyManager::source_tables(sql)?;
    for table in tables {
        println!("{}", table);
    }
    Ok(())
}

fn main() {
    // Set up logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            catalog,
            sort,
            caller,
            sql,
        } => compile(&catalog, sort, caller, &sql),
        Commands::Ddl { catalog, table } => ddl(&catalog, &table),
        Commands::Sources { sql } => sources(&sql),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
