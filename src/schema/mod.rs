//! Table identities, column schemas and the schema resolver

mod column;
mod identity;
mod resolver;

pub use column::{
    ColumnSchema, ColumnType, FacetType, DEFAULT_MAX_LIST_LENGTH, DEFAULT_STRING_SIZE,
};
pub use identity::TableIdentity;
pub use resolver::{InMemorySchemaResolver, ObjectType, SchemaResolver, TableKind};
