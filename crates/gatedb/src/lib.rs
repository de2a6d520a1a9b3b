//! Schema-definition and mutation-pipeline layer over a hosted document
//! database: typed tables, field validation, defaults, unique constraints,
//! relations with on-delete policies, and index declarations, with every
//! write flowing through one ordered pipeline.
#![warn(unreachable_pub)]

pub mod db;
pub mod error;
pub mod identity;
pub mod obs;
pub mod schema;
pub mod value;

///
/// CONSTANTS
///

/// Maximum segment depth of a dotted field path.
///
/// Keeps nested-field addressing, index components, and patch diffs within
/// bounded shapes.
pub const MAX_FIELD_PATH_DEPTH: usize = 4;

/// Maximum relation depth a cascading delete may traverse.
///
/// Deeper chains abort the whole delete rather than walk an unbounded (or
/// cyclic) relation graph.
pub const MAX_CASCADE_DEPTH: usize = 4;

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///
/// Domain vocabulary only; executors, stores, and helpers stay at their
/// module paths.
///

pub mod prelude {
    pub use crate::{
        db::{Database, Operation, StageOverrides},
        error::GateError,
        identity::{FieldPath, IndexName, TableName},
        schema::{
            default::DefaultValue,
            field::{FieldKind, FieldSpec},
            registry::SchemaRegistry,
            relation::OnDelete,
            table::TableBuilder,
            unique::OnConflict,
        },
        value::{Document, DocumentId, Value},
    };
}
