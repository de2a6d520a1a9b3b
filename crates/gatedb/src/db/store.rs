//! Store boundary.
//!
//! The hosting document database is consumed as an opaque transactional
//! key-value-with-indexes store through [`Datastore`]. `MemoryStore` is the
//! in-process reference implementation used by tests and embeddings; it
//! maintains the physical indexes the registry declares.

use crate::{
    error::GateError,
    identity::{IndexName, TableName},
    schema::{index::IndexModel, registry::SchemaRegistry},
    value::{Document, DocumentId, Value},
};
use std::collections::{BTreeMap, BTreeSet};

///
/// Datastore
///
/// Contract: point reads, whole-document writes, and equality prefix scans
/// over declared indexes. Each call is atomic with respect to the store;
/// nothing here adds locking on top.
///

pub trait Datastore {
    fn get(&self, table: &TableName, id: DocumentId) -> Option<Document>;

    /// Insert a new document, returning its store-assigned id.
    fn insert(&mut self, table: &TableName, doc: Document) -> Result<DocumentId, GateError>;

    /// Merge `fields` into an existing document.
    fn patch(
        &mut self,
        table: &TableName,
        id: DocumentId,
        fields: Document,
    ) -> Result<(), GateError>;

    /// Overwrite an existing document wholesale.
    fn replace(
        &mut self,
        table: &TableName,
        id: DocumentId,
        doc: Document,
    ) -> Result<(), GateError>;

    fn delete(&mut self, table: &TableName, id: DocumentId) -> Result<(), GateError>;

    /// Equality prefix lookup against a declared index. `prefix` holds
    /// values for the index's leading fields, in index-field order.
    fn scan_index(
        &self,
        table: &TableName,
        index: &IndexName,
        prefix: &[Value],
    ) -> Vec<(DocumentId, Document)>;
}

///
/// MemoryStore
///

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: BTreeMap<TableName, BTreeMap<DocumentId, Document>>,
    // (table, index) -> canonical component tuple -> member ids
    entries: BTreeMap<(TableName, IndexName), BTreeMap<Vec<String>, BTreeSet<DocumentId>>>,
    index_defs: BTreeMap<TableName, Vec<IndexModel>>,
}

impl MemoryStore {
    /// Build a store with the physical indexes the registry declares.
    #[must_use]
    pub fn new(registry: &SchemaRegistry) -> Self {
        let mut store = Self::default();
        for table in registry.tables() {
            store.rows.insert(table.name().clone(), BTreeMap::new());
            store
                .index_defs
                .insert(table.name().clone(), table.indexes().to_vec());
            for index in table.indexes() {
                store
                    .entries
                    .insert((table.name().clone(), index.name.clone()), BTreeMap::new());
            }
        }
        store
    }

    #[must_use]
    pub fn len(&self, table: &TableName) -> usize {
        self.rows.get(table).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, table: &TableName) -> bool {
        self.len(table) == 0
    }

    fn components(index: &IndexModel, doc: &Document) -> Vec<String> {
        index
            .fields
            .iter()
            .map(|field| {
                doc.get_path(field)
                    .map_or_else(|| Value::Null.canonical_key(), Value::canonical_key)
            })
            .collect()
    }

    fn index_doc(&mut self, table: &TableName, id: DocumentId, doc: &Document) {
        let Some(defs) = self.index_defs.get(table) else {
            return;
        };
        for index in defs {
            let key = Self::components(index, doc);
            if let Some(entries) = self.entries.get_mut(&(table.clone(), index.name.clone())) {
                entries.entry(key).or_default().insert(id);
            }
        }
    }

    fn deindex_doc(&mut self, table: &TableName, id: DocumentId, doc: &Document) {
        let Some(defs) = self.index_defs.get(table) else {
            return;
        };
        for index in defs {
            let key = Self::components(index, doc);
            if let Some(entries) = self.entries.get_mut(&(table.clone(), index.name.clone()))
                && let Some(members) = entries.get_mut(&key)
            {
                members.remove(&id);
                if members.is_empty() {
                    entries.remove(&key);
                }
            }
        }
    }

    fn require_row(&self, table: &TableName, id: DocumentId) -> Result<Document, GateError> {
        self.rows
            .get(table)
            .and_then(|rows| rows.get(&id))
            .cloned()
            .ok_or_else(|| GateError::store(format!("row not found in store: {table}/{id}")))
    }
}

impl Datastore for MemoryStore {
    fn get(&self, table: &TableName, id: DocumentId) -> Option<Document> {
        self.rows.get(table).and_then(|rows| rows.get(&id)).cloned()
    }

    fn insert(&mut self, table: &TableName, doc: Document) -> Result<DocumentId, GateError> {
        if !self.rows.contains_key(table) {
            return Err(GateError::store(format!("unknown table in store: {table}")));
        }

        let id = DocumentId::generate();
        self.index_doc(table, id, &doc);
        if let Some(rows) = self.rows.get_mut(table) {
            rows.insert(id, doc);
        }

        Ok(id)
    }

    fn patch(
        &mut self,
        table: &TableName,
        id: DocumentId,
        fields: Document,
    ) -> Result<(), GateError> {
        let old = self.require_row(table, id)?;
        let merged = old.merged_with(&fields);

        self.deindex_doc(table, id, &old);
        self.index_doc(table, id, &merged);
        if let Some(rows) = self.rows.get_mut(table) {
            rows.insert(id, merged);
        }

        Ok(())
    }

    fn replace(
        &mut self,
        table: &TableName,
        id: DocumentId,
        doc: Document,
    ) -> Result<(), GateError> {
        let old = self.require_row(table, id)?;

        self.deindex_doc(table, id, &old);
        self.index_doc(table, id, &doc);
        if let Some(rows) = self.rows.get_mut(table) {
            rows.insert(id, doc);
        }

        Ok(())
    }

    fn delete(&mut self, table: &TableName, id: DocumentId) -> Result<(), GateError> {
        let old = self.require_row(table, id)?;

        self.deindex_doc(table, id, &old);
        if let Some(rows) = self.rows.get_mut(table) {
            rows.remove(&id);
        }

        Ok(())
    }

    fn scan_index(
        &self,
        table: &TableName,
        index: &IndexName,
        prefix: &[Value],
    ) -> Vec<(DocumentId, Document)> {
        let Some(entries) = self.entries.get(&(table.clone(), index.clone())) else {
            return Vec::new();
        };

        let encoded: Vec<String> = prefix.iter().map(Value::canonical_key).collect();
        let mut out = Vec::new();

        for (key, members) in entries.range(encoded.clone()..) {
            if !key.starts_with(&encoded) {
                break;
            }
            for id in members {
                if let Some(doc) = self.rows.get(table).and_then(|rows| rows.get(id)) {
                    out.push((*id, doc.clone()));
                }
            }
        }

        out
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
        table::TableBuilder,
        unique::OnConflict,
    };

    fn store() -> (MemoryStore, TableName) {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                "users",
                TableBuilder::new("users")
                    .field("email", FieldSpec::required(FieldKind::Text))
                    .field("age", FieldSpec::optional(FieldKind::Int))
                    .unique("email", OnConflict::Fail)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let registry = registry.finish().unwrap();

        (
            MemoryStore::new(&registry),
            TableName::try_from_str("users").unwrap(),
        )
    }

    #[test]
    fn insert_get_roundtrip() {
        let (mut store, users) = store();
        let doc = Document::new().set("email", "a@b.c");
        let id = store.insert(&users, doc.clone()).unwrap();

        assert_eq!(store.get(&users, id), Some(doc));
        assert_eq!(store.len(&users), 1);
    }

    #[test]
    fn index_lookup_finds_by_value() {
        let (mut store, users) = store();
        let id = store
            .insert(&users, Document::new().set("email", "a@b.c"))
            .unwrap();
        store
            .insert(&users, Document::new().set("email", "x@y.z"))
            .unwrap();

        let index = IndexName::sanitized("by_email");
        let hits = store.scan_index(&users, &index, &[Value::Text("a@b.c".into())]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id);
    }

    #[test]
    fn patch_reindexes_changed_values() {
        let (mut store, users) = store();
        let id = store
            .insert(&users, Document::new().set("email", "a@b.c"))
            .unwrap();

        store
            .patch(&users, id, Document::new().set("email", "new@b.c"))
            .unwrap();

        let index = IndexName::sanitized("by_email");
        assert!(
            store
                .scan_index(&users, &index, &[Value::Text("a@b.c".into())])
                .is_empty()
        );
        let hits = store.scan_index(&users, &index, &[Value::Text("new@b.c".into())]);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn delete_removes_row_and_index_entries() {
        let (mut store, users) = store();
        let id = store
            .insert(&users, Document::new().set("email", "a@b.c"))
            .unwrap();

        store.delete(&users, id).unwrap();

        assert!(store.get(&users, id).is_none());
        let index = IndexName::sanitized("by_email");
        assert!(
            store
                .scan_index(&users, &index, &[Value::Text("a@b.c".into())])
                .is_empty()
        );
    }

    #[test]
    fn mutations_on_missing_rows_fail() {
        let (mut store, users) = store();
        let ghost = DocumentId::generate();

        assert!(store.patch(&users, ghost, Document::new()).is_err());
        assert!(store.replace(&users, ghost, Document::new()).is_err());
        assert!(store.delete(&users, ghost).is_err());
    }
}
