use crate::{
    identity::TableName,
    schema::{SchemaError, relation::ReverseRelation, table::TableModel},
};
use std::collections::BTreeMap;

///
/// SchemaRegistry
///
/// The set of declared tables plus the inverted relation index. Mutable only
/// while registering; `finish()` runs cross-table checks and from then on the
/// registry is shared read-only state.
///

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<TableName, TableModel>,
    reverse_relations: BTreeMap<TableName, Vec<ReverseRelation>>,
    schema_validation: bool,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            reverse_relations: BTreeMap::new(),
            schema_validation: true,
        }
    }

    /// Disable the registry-wide schema-validation flag carried in the export.
    #[must_use]
    pub const fn without_schema_validation(mut self) -> Self {
        self.schema_validation = false;
        self
    }

    /// Register a table under `key`. The table's declared name must equal the
    /// key, and each name registers exactly once. The inverted relation index
    /// is maintained here so deletes never scan all tables.
    pub fn register(&mut self, key: &str, table: TableModel) -> Result<(), SchemaError> {
        if table.name().as_str() != key {
            return Err(SchemaError::TableNameMismatch {
                declared: table.name().clone(),
                key: key.to_string(),
            });
        }
        if self.tables.contains_key(table.name()) {
            return Err(SchemaError::DuplicateTable {
                table: table.name().clone(),
            });
        }

        for relation in table.relations() {
            self.reverse_relations
                .entry(relation.target.clone())
                .or_default()
                .push(ReverseRelation {
                    source: table.name().clone(),
                    field: relation.field.clone(),
                    on_delete: relation.on_delete,
                });
        }

        self.tables.insert(table.name().clone(), table);
        Ok(())
    }

    /// Cross-table validation: every relation target must be a registered
    /// table. Consumes and returns the registry so the checked value is the
    /// one callers go on to share.
    pub fn finish(self) -> Result<Self, SchemaError> {
        for table in self.tables.values() {
            for relation in table.relations() {
                if !self.tables.contains_key(&relation.target) {
                    return Err(SchemaError::RelationTargetMissing {
                        table: table.name().clone(),
                        field: relation.field.as_str().to_string(),
                        target: relation.target.clone(),
                    });
                }
            }
        }

        Ok(self)
    }

    #[must_use]
    pub fn get(&self, name: &TableName) -> Option<&TableModel> {
        self.tables.get(name)
    }

    pub fn try_get(&self, name: &str) -> Result<&TableModel, SchemaError> {
        let table = TableName::try_from_str(name)?;
        self.tables
            .get(&table)
            .ok_or_else(|| SchemaError::TableNotFound {
                table: name.to_string(),
            })
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableModel> {
        self.tables.values()
    }

    /// Tables (and fields) that declare a relation pointing at `target`.
    #[must_use]
    pub fn reverse_relations(&self, target: &TableName) -> &[ReverseRelation] {
        self.reverse_relations
            .get(target)
            .map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub const fn schema_validation(&self) -> bool {
        self.schema_validation
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        field::{FieldKind, FieldSpec},
        relation::OnDelete,
        table::TableBuilder,
    };

    fn posts() -> TableModel {
        TableBuilder::new("posts")
            .field("title", FieldSpec::required(FieldKind::Text))
            .build()
            .unwrap()
    }

    fn comments() -> TableModel {
        TableBuilder::new("comments")
            .field(
                "post_id",
                FieldSpec::required(FieldKind::Ref(
                    TableName::try_from_str("posts").unwrap(),
                )),
            )
            .relation("post_id", "posts", OnDelete::Restrict)
            .build()
            .unwrap()
    }

    #[test]
    fn register_rejects_key_mismatch() {
        let mut registry = SchemaRegistry::new();
        let err = registry.register("not_posts", posts()).unwrap_err();
        assert!(matches!(err, SchemaError::TableNameMismatch { .. }));
    }

    #[test]
    fn register_rejects_duplicate_table() {
        let mut registry = SchemaRegistry::new();
        registry.register("posts", posts()).unwrap();
        let err = registry.register("posts", posts()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateTable { .. }));
    }

    #[test]
    fn reverse_relations_are_inverted_at_registration() {
        let mut registry = SchemaRegistry::new();
        registry.register("posts", posts()).unwrap();
        registry.register("comments", comments()).unwrap();
        let registry = registry.finish().unwrap();

        let target = TableName::try_from_str("posts").unwrap();
        let reverse = registry.reverse_relations(&target);
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].source.as_str(), "comments");
        assert_eq!(reverse[0].field.as_str(), "post_id");
        assert_eq!(reverse[0].on_delete, OnDelete::Restrict);
    }

    #[test]
    fn finish_rejects_dangling_relation_target() {
        let mut registry = SchemaRegistry::new();
        registry.register("comments", comments()).unwrap();

        let err = registry.finish().unwrap_err();
        assert!(matches!(err, SchemaError::RelationTargetMissing { .. }));
    }

    #[test]
    fn missing_table_lookup_is_rejected() {
        let registry = SchemaRegistry::new();
        let err = registry.try_get("ghosts").unwrap_err();
        assert!(matches!(err, SchemaError::TableNotFound { .. }));
    }
}
