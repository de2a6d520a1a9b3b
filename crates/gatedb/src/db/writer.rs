//! Database facade and fluent write builders.
//!
//! [`Database`] owns the registry and the store. Reads go straight to the
//! store; every write goes through a [`DatabaseWriter`] builder, which
//! routes into the mutation pipeline with per-run policy (stage
//! overrides, metrics sink).

use crate::{
    db::{
        pipeline::{MutationPipeline, StageOverrides},
        store::{Datastore, MemoryStore},
    },
    error::GateError,
    identity::IndexName,
    obs::sink::{MetricsSink, with_metrics_sink},
    schema::{export::SchemaExport, registry::SchemaRegistry},
    value::{Document, DocumentId, Value},
};

///
/// Database
///

pub struct Database {
    registry: SchemaRegistry,
    store: MemoryStore,
}

impl Database {
    #[must_use]
    pub fn new(registry: SchemaRegistry) -> Self {
        let store = MemoryStore::new(&registry);
        Self { registry, store }
    }

    #[must_use]
    pub const fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn get(&self, table: &str, id: DocumentId) -> Result<Option<Document>, GateError> {
        let table = self.registry.try_get(table)?.name().clone();
        Ok(self.store.get(&table, id))
    }

    /// Equality prefix lookup against a declared plain index.
    pub fn scan_index(
        &self,
        table: &str,
        index: &str,
        prefix: &[Value],
    ) -> Result<Vec<(DocumentId, Document)>, GateError> {
        let table = self.registry.try_get(table)?.name().clone();
        let index = IndexName::sanitized(index);
        Ok(self.store.scan_index(&table, &index, prefix))
    }

    /// Portable schema snapshot for diffing and tooling.
    #[must_use]
    pub fn export_schema(&self) -> SchemaExport {
        SchemaExport::from_registry(&self.registry)
    }

    #[must_use]
    pub fn writer(&mut self) -> DatabaseWriter<'_> {
        DatabaseWriter {
            registry: &self.registry,
            store: &mut self.store,
            metrics: None,
        }
    }
}

///
/// DatabaseWriter
///
/// Write-scoped handle with policy. One writer per logical mutation;
/// batch terminals are per item, fail-fast, non-atomic.
///

pub struct DatabaseWriter<'a> {
    registry: &'a SchemaRegistry,
    store: &'a mut MemoryStore,
    metrics: Option<&'a dyn MetricsSink>,
}

impl<'a> DatabaseWriter<'a> {
    #[must_use]
    pub fn metrics_sink(mut self, sink: &'a dyn MetricsSink) -> Self {
        self.metrics = Some(sink);
        self
    }

    #[must_use]
    pub fn insert(self, table: &str) -> InsertBuilder<'a> {
        InsertBuilder {
            writer: self,
            table: table.to_string(),
            overrides: StageOverrides::default(),
        }
    }

    #[must_use]
    pub fn patch(self, table: &str) -> PatchBuilder<'a> {
        PatchBuilder {
            writer: self,
            table: table.to_string(),
            overrides: StageOverrides::default(),
        }
    }

    #[must_use]
    pub fn replace(self, table: &str) -> ReplaceBuilder<'a> {
        ReplaceBuilder {
            writer: self,
            table: table.to_string(),
            overrides: StageOverrides::default(),
        }
    }

    #[must_use]
    pub fn delete(self, table: &str) -> DeleteBuilder<'a> {
        DeleteBuilder {
            writer: self,
            table: table.to_string(),
            overrides: StageOverrides::default(),
        }
    }

    fn run<T>(
        &mut self,
        op: impl FnOnce(&mut MutationPipeline<'_>) -> Result<T, GateError>,
    ) -> Result<T, GateError> {
        let mut pipeline = MutationPipeline::new(self.registry, self.store);
        match self.metrics {
            Some(sink) => with_metrics_sink(sink, || op(&mut pipeline)),
            None => op(&mut pipeline),
        }
    }
}

///
/// InsertBuilder
///

pub struct InsertBuilder<'a> {
    writer: DatabaseWriter<'a>,
    table: String,
    overrides: StageOverrides,
}

impl InsertBuilder<'_> {
    /// Skip the parse stage: no defaults, no validation.
    #[must_use]
    pub const fn without_validation(mut self) -> Self {
        self.overrides = self.overrides.parse(false);
        self
    }

    #[must_use]
    pub const fn config(mut self, overrides: StageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn one(mut self, doc: Document) -> Result<DocumentId, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer.run(|p| p.insert_with(&table, doc, overrides))
    }

    pub fn many(mut self, docs: Vec<Document>) -> Result<Vec<DocumentId>, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer.run(|p| {
            let mut ids = Vec::with_capacity(docs.len());
            for doc in docs {
                ids.push(p.insert_with(&table, doc, overrides)?);
            }
            Ok(ids)
        })
    }
}

///
/// PatchBuilder
///

pub struct PatchBuilder<'a> {
    writer: DatabaseWriter<'a>,
    table: String,
    overrides: StageOverrides,
}

impl PatchBuilder<'_> {
    #[must_use]
    pub const fn without_validation(mut self) -> Self {
        self.overrides = self.overrides.parse(false);
        self
    }

    #[must_use]
    pub const fn config(mut self, overrides: StageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn one(mut self, id: DocumentId, fields: Document) -> Result<DocumentId, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer.run(|p| p.patch_with(&table, id, fields, overrides))
    }

    /// Pairwise batch; the arity check runs before any item does.
    pub fn many(
        mut self,
        ids: &[DocumentId],
        payloads: Vec<Document>,
    ) -> Result<Vec<DocumentId>, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer
            .run(|p| p.patch_many_with(&table, ids, payloads, overrides))
    }
}

///
/// ReplaceBuilder
///

pub struct ReplaceBuilder<'a> {
    writer: DatabaseWriter<'a>,
    table: String,
    overrides: StageOverrides,
}

impl ReplaceBuilder<'_> {
    #[must_use]
    pub const fn without_validation(mut self) -> Self {
        self.overrides = self.overrides.parse(false);
        self
    }

    #[must_use]
    pub const fn config(mut self, overrides: StageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn one(mut self, id: DocumentId, doc: Document) -> Result<DocumentId, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer.run(|p| p.replace_with(&table, id, doc, overrides))
    }

    pub fn many(
        mut self,
        ids: &[DocumentId],
        payloads: Vec<Document>,
    ) -> Result<Vec<DocumentId>, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer
            .run(|p| p.replace_many_with(&table, ids, payloads, overrides))
    }
}

///
/// DeleteBuilder
///

pub struct DeleteBuilder<'a> {
    writer: DatabaseWriter<'a>,
    table: String,
    overrides: StageOverrides,
}

impl DeleteBuilder<'_> {
    #[must_use]
    pub const fn config(mut self, overrides: StageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn one(mut self, id: DocumentId) -> Result<DocumentId, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer.run(|p| p.delete_with(&table, id, overrides))
    }

    pub fn many(mut self, ids: &[DocumentId]) -> Result<Vec<DocumentId>, GateError> {
        let (table, overrides) = (self.table, self.overrides);
        self.writer.run(|p| {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                out.push(p.delete_with(&table, *id, overrides)?);
            }
            Ok(out)
        })
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        obs::sink::MetricsEvent,
        schema::{
            field::{FieldKind, FieldSpec},
            table::TableBuilder,
            unique::OnConflict,
        },
    };
    use std::sync::Mutex;

    fn database() -> Database {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                "users",
                TableBuilder::new("users")
                    .field("email", FieldSpec::required(FieldKind::Text))
                    .field("name", FieldSpec::optional(FieldKind::Text))
                    .unique("email", OnConflict::Fail)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        Database::new(registry.finish().unwrap())
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut db = database();
        let id = db
            .writer()
            .insert("users")
            .one(Document::new().set("email", "a@b.c"))
            .unwrap();

        let stored = db.get("users", id).unwrap().unwrap();
        assert_eq!(stored.get("email"), Some(&Value::Text("a@b.c".into())));
    }

    #[test]
    fn scan_index_resolves_raw_index_name() {
        let mut db = database();
        let id = db
            .writer()
            .insert("users")
            .one(Document::new().set("email", "a@b.c"))
            .unwrap();

        let hits = db
            .scan_index("users", "by_email", &[Value::Text("a@b.c".into())])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, id);
    }

    #[test]
    fn without_validation_skips_the_parse_stage() {
        let mut db = database();
        let id = db
            .writer()
            .insert("users")
            .without_validation()
            .one(Document::new().set("name", "no email"))
            .unwrap();

        assert!(db.get("users", id).unwrap().is_some());
    }

    #[test]
    fn batch_terminals_honor_stage_overrides() {
        let mut db = database();
        let id = db
            .writer()
            .insert("users")
            .one(Document::new().set("email", "a@b.c"))
            .unwrap();

        // Parse skipped: an undeclared field sails through and is written.
        db.writer()
            .patch("users")
            .without_validation()
            .many(&[id], vec![Document::new().set("rogue", Value::Int(1))])
            .unwrap();
        let stored = db.get("users", id).unwrap().unwrap();
        assert_eq!(stored.get("rogue"), Some(&Value::Int(1)));

        // Parse skipped: a replace missing the required field still lands.
        db.writer()
            .replace("users")
            .without_validation()
            .many(&[id], vec![Document::new().set("name", "no email")])
            .unwrap();
        let stored = db.get("users", id).unwrap().unwrap();
        assert_eq!(stored.get("email"), None);
        assert_eq!(stored.get("name"), Some(&Value::Text("no email".into())));
    }

    #[test]
    fn builder_terminals_cover_all_operations() {
        let mut db = database();
        let id = db
            .writer()
            .insert("users")
            .one(Document::new().set("email", "a@b.c"))
            .unwrap();

        db.writer()
            .patch("users")
            .one(id, Document::new().set("name", "Ada"))
            .unwrap();
        assert_eq!(
            db.get("users", id).unwrap().unwrap().get("name"),
            Some(&Value::Text("Ada".into()))
        );

        db.writer()
            .replace("users")
            .one(id, Document::new().set("email", "b@b.c"))
            .unwrap();
        let replaced = db.get("users", id).unwrap().unwrap();
        assert_eq!(replaced.get("name"), None);

        db.writer().delete("users").one(id).unwrap();
        assert!(db.get("users", id).unwrap().is_none());
    }

    #[test]
    fn writer_metrics_sink_sees_pipeline_events() {
        struct Capture(Mutex<Vec<String>>);

        impl MetricsSink for Capture {
            fn record(&self, event: &MetricsEvent) {
                if let MetricsEvent::PipelineStart { table, operation } = event {
                    self.0.lock().unwrap().push(format!("{operation}:{table}"));
                }
            }
        }

        let mut db = database();
        let capture = Capture(Mutex::new(Vec::new()));

        db.writer()
            .metrics_sink(&capture)
            .insert("users")
            .one(Document::new().set("email", "a@b.c"))
            .unwrap();

        assert_eq!(
            capture.0.lock().unwrap().as_slice(),
            &["insert:users".to_string()]
        );
    }

    #[test]
    fn export_schema_lists_registered_tables() {
        let db = database();
        let export = db.export_schema();
        assert!(export.tables.iter().any(|t| t.table_name == "users"));
    }
}
