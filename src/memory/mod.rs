//! In-memory collaborators
//!
//! Backing index, authorization, table status and locking held in process
//! memory. Used by the CLI, the tests and the benchmarks.

mod authorizer;
mod eval;
mod index;
mod locks;
mod status;

pub use authorizer::InMemoryAuthorizer;
pub use index::{InMemoryTableIndex, IndexRow};
pub use locks::InMemoryTableLocks;
pub use status::InMemoryTableStatus;
