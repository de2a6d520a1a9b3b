use crate::identity::{FieldPath, TableName};
use serde::{Deserialize, Serialize};

///
/// OnDelete
/// Action taken on referencing documents when a referenced document is
/// deleted.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Block the delete while dependents exist.
    Restrict,
    /// Delete dependents transitively (bounded depth).
    Cascade,
    /// Null out the referencing field; requires the field to be optional.
    SetOptional,
}

///
/// RelationRule
///
/// Declared on the referencing table, pointing at the target. The registry
/// inverts these at registration time so deletes never scan all tables.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationRule {
    pub field: FieldPath,
    pub target: TableName,
    pub on_delete: OnDelete,
}

///
/// ReverseRelation
/// Registry-inverted view: who references a given target table, and how.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReverseRelation {
    pub source: TableName,
    pub field: FieldPath,
    pub on_delete: OnDelete,
}
