//! Runtime engine: storage boundary, mutation pipeline, relation
//! enforcement, hooks, and the database facade.

pub mod hooks;
pub mod pipeline;
pub(crate) mod relation;
pub mod store;
pub mod writer;

// re-exports
pub use pipeline::{MutationPipeline, Operation, StageConfig, StageOverrides};
pub use store::{Datastore, MemoryStore};
pub use writer::{Database, DatabaseWriter};
