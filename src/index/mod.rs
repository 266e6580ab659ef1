//! Backing index descriptions and materialized view dependencies

mod dependency;
mod description;

pub use dependency::{
    InMemorySourceTableStore, MaterializedViewDependencyManager, SourceTableChanges,
    SourceTableOp, SourceTableStore, SourceTableWriter,
};
pub use description::{
    BenefactorDescription, IndexDescription, IndexDescriptionProvider, IndexDescriptionResolver,
    SqlContext, DEFINING_SQL_WITH_GROUP_BY_ERROR, ROW_BENEFACTOR, ROW_ETAG, ROW_ID, ROW_VERSION,
};
