//! Secured SQL engine for virtual tables
//!
//! Compiles user SQL written against public table and column names into
//! parameterized SQL over the backing index, restricts it to the rows the
//! caller may read, and assembles paged result bundles. Also tracks the
//! source tables of materialized views and emits index DDL.

pub mod config;
pub mod error;
pub mod execution;
pub mod index;
pub mod memory;
pub mod parser;
pub mod planner;
pub mod schema;

// Re-export main types
pub use config::EngineConfig;
pub use error::{QueryError, Result};
pub use execution::{
    PrincipalId, ProgressContext, QueryBundleRequest, QueryResultBundle, QueryServices,
    TableQuery, TableQueryManager,
};
pub use index::{IndexDescription, MaterializedViewDependencyManager};
pub use planner::{SqlQuery, SqlQueryBuilder};
pub use schema::{ColumnSchema, ColumnType, TableIdentity, TableKind};
