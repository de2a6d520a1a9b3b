//! Declarative table model: field specs, defaults, indexes, unique rules,
//! relations, and the registry binding them together.
//!
//! Schema code defines *what exists*; the `db` tree defines *what runs*.

pub mod default;
pub mod export;
pub mod field;
pub mod index;
pub mod registry;
pub mod relation;
pub mod table;
pub mod unique;

use crate::{
    error::{ErrorClass, GateError},
    identity::{FieldPathError, IndexName, TableName, TableNameError},
};
use thiserror::Error as ThisError;

///
/// SchemaError
///
/// Declaration-time failures. Raised by `TableBuilder::build` and registry
/// registration; never during mutation execution.
///

#[derive(Debug, ThisError)]
pub enum SchemaError {
    #[error(transparent)]
    InvalidTableName(#[from] TableNameError),

    #[error(transparent)]
    InvalidFieldPath(#[from] FieldPathError),

    #[error("table '{table}' declares field '{field}' more than once")]
    DuplicateField { table: TableName, field: String },

    #[error("table '{table}' declares system-reserved field '{field}'")]
    SystemField { table: TableName, field: String },

    #[error("table '{table}' {context} references unknown field '{field}'")]
    UnknownField {
        table: TableName,
        field: String,
        context: &'static str,
    },

    #[error("table '{table}' relation field '{field}' is not ref-typed")]
    RelationFieldNotRef { table: TableName, field: String },

    #[error(
        "table '{table}' set-optional relation on required field '{field}'; make the field optional or change the policy"
    )]
    SetOptionalRequiresOptionalField { table: TableName, field: String },

    #[error("table '{table}' declares index '{index}' more than once")]
    DuplicateIndexName { table: TableName, index: IndexName },

    #[error("table '{table}' declares a unique rule with no fields")]
    UniqueRuleWithoutFields { table: TableName },

    #[error("table declared as '{declared}' but registered under key '{key}'")]
    TableNameMismatch { declared: TableName, key: String },

    #[error("table '{table}' already registered")]
    DuplicateTable { table: TableName },

    #[error("table '{table}' not found in schema registry")]
    TableNotFound { table: String },

    #[error("table '{table}' relation field '{field}' targets unknown table '{target}'")]
    RelationTargetMissing {
        table: TableName,
        field: String,
        target: TableName,
    },
}

impl SchemaError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::TableNotFound { .. } => ErrorClass::NotFound,
            Self::DuplicateTable { .. } | Self::TableNameMismatch { .. } => {
                ErrorClass::InvariantViolation
            }
            _ => ErrorClass::Schema,
        }
    }
}

impl From<SchemaError> for GateError {
    fn from(err: SchemaError) -> Self {
        Self::new(err.class(), err.to_string())
    }
}
