//! Relation engine: delete-time enforcement of declared on-delete policies.
//!
//! The registry inverts relation declarations at registration time, so a
//! delete only probes the tables that actually reference the target,
//! through their automatic relation indexes, never by scanning all tables.

use crate::{
    MAX_CASCADE_DEPTH,
    db::{
        pipeline::{MutationPipeline, StageOverrides},
        store::Datastore,
    },
    error::GateError,
    identity::{FieldPath, TableName},
    obs::sink::{self, MetricsEvent},
    schema::registry::SchemaRegistry,
    value::{Document, DocumentId, Value},
};
use std::collections::{BTreeMap, BTreeSet};

/// Apply on-delete policies for every relation pointing at `table`/`id`.
///
/// Two passes. The first is read-only and walks the whole pending delete
/// graph, cascade edges included, so a restrict relation anywhere in it
/// (and a cascade deeper than the depth bound) rejects the delete before
/// a single dependent row is touched. The second pass performs the
/// cascade and set-optional mutations.
pub(crate) fn enforce_on_delete(
    pipeline: &mut MutationPipeline<'_>,
    table: &TableName,
    id: DocumentId,
    depth: usize,
    visited: &mut BTreeSet<(TableName, DocumentId)>,
) -> Result<(), GateError> {
    let registry = pipeline.registry;

    if depth == 0 {
        let mut seen = visited.clone();
        check_delete_blockers(registry, &*pipeline.store, table, id, 0, &mut seen)?;
    }

    let reverse = registry.reverse_relations(table).to_vec();

    for relation in reverse {
        let source_model = registry.get(&relation.source).ok_or_else(|| {
            GateError::invariant(format!(
                "reverse relation source missing: {} -> {table}",
                relation.source
            ))
        })?;

        // The automatic single-field relation index exists by build invariant.
        let index = source_model
            .index_covering(std::slice::from_ref(&relation.field))
            .ok_or_else(|| {
                GateError::invariant(format!(
                    "relation field {}.{} has no backing index",
                    relation.source, relation.field
                ))
            })?;

        sink::record(&MetricsEvent::RelationValidation {
            table: table.as_str().to_string(),
            reverse_lookups: 1,
            blocked_deletes: 0,
        });

        let dependents: Vec<(DocumentId, Document)> = pipeline
            .store
            .scan_index(&relation.source, &index.name, &[Value::Ref(id)])
            .into_iter()
            .filter(|(dep_id, doc)| {
                doc.get_path(&relation.field) == Some(&Value::Ref(id))
                    && !visited.contains(&(relation.source.clone(), *dep_id))
            })
            .collect();

        if dependents.is_empty() {
            continue;
        }

        match relation.on_delete {
            crate::schema::relation::OnDelete::Restrict => {
                sink::record(&MetricsEvent::RelationValidation {
                    table: table.as_str().to_string(),
                    reverse_lookups: 0,
                    blocked_deletes: 1,
                });

                return Err(GateError::dependent_record(
                    table.clone(),
                    id,
                    relation.source.clone(),
                    relation.field.as_str(),
                ));
            }
            crate::schema::relation::OnDelete::SetOptional => {
                for (dep_id, doc) in dependents {
                    let patch = null_patch(&doc, &relation.field);
                    pipeline.store.patch(&relation.source, dep_id, patch)?;
                }
            }
            crate::schema::relation::OnDelete::Cascade => {
                if depth >= MAX_CASCADE_DEPTH {
                    return Err(GateError::invariant(format!(
                        "cascade depth {MAX_CASCADE_DEPTH} exceeded deleting {table}/{id}; \
                         check relation declarations for deep or cyclic cascades"
                    )));
                }

                for (dep_id, _) in dependents {
                    sink::record(&MetricsEvent::CascadeDelete {
                        table: relation.source.as_str().to_string(),
                    });
                    pipeline.delete_recursive(
                        &relation.source,
                        dep_id,
                        StageOverrides::default(),
                        depth + 1,
                        visited,
                    )?;
                }
            }
        }
    }

    Ok(())
}

/// Read-only walk of the pending delete graph. Errors on the first
/// restrict relation holding live dependents and on a cascade chain past
/// the depth bound; never touches the store.
fn check_delete_blockers(
    registry: &SchemaRegistry,
    store: &dyn Datastore,
    table: &TableName,
    id: DocumentId,
    depth: usize,
    seen: &mut BTreeSet<(TableName, DocumentId)>,
) -> Result<(), GateError> {
    for relation in registry.reverse_relations(table) {
        let source_model = registry.get(&relation.source).ok_or_else(|| {
            GateError::invariant(format!(
                "reverse relation source missing: {} -> {table}",
                relation.source
            ))
        })?;

        let index = source_model
            .index_covering(std::slice::from_ref(&relation.field))
            .ok_or_else(|| {
                GateError::invariant(format!(
                    "relation field {}.{} has no backing index",
                    relation.source, relation.field
                ))
            })?;

        let dependents: Vec<DocumentId> = store
            .scan_index(&relation.source, &index.name, &[Value::Ref(id)])
            .into_iter()
            .filter(|(dep_id, doc)| {
                doc.get_path(&relation.field) == Some(&Value::Ref(id))
                    && !seen.contains(&(relation.source.clone(), *dep_id))
            })
            .map(|(dep_id, _)| dep_id)
            .collect();

        if dependents.is_empty() {
            continue;
        }

        match relation.on_delete {
            crate::schema::relation::OnDelete::Restrict => {
                sink::record(&MetricsEvent::RelationValidation {
                    table: table.as_str().to_string(),
                    reverse_lookups: 0,
                    blocked_deletes: 1,
                });

                return Err(GateError::dependent_record(
                    table.clone(),
                    id,
                    relation.source.clone(),
                    relation.field.as_str(),
                ));
            }
            crate::schema::relation::OnDelete::SetOptional => {}
            crate::schema::relation::OnDelete::Cascade => {
                if depth >= MAX_CASCADE_DEPTH {
                    return Err(GateError::invariant(format!(
                        "cascade depth {MAX_CASCADE_DEPTH} exceeded deleting {table}/{id}; \
                         check relation declarations for deep or cyclic cascades"
                    )));
                }

                for dep_id in dependents {
                    seen.insert((relation.source.clone(), dep_id));
                    check_delete_blockers(registry, store, &relation.source, dep_id, depth + 1, seen)?;
                }
            }
        }
    }

    Ok(())
}

/// Build the patch payload that nulls a (possibly nested) referencing field.
fn null_patch(doc: &Document, path: &FieldPath) -> Document {
    if !path.is_nested() {
        return Document::new().set(path.root(), Value::Null);
    }

    let mut root_value = doc
        .get(path.root())
        .cloned()
        .unwrap_or_else(|| Value::Map(BTreeMap::new()));
    let segments: Vec<&str> = path.segments().skip(1).collect();
    set_null(&mut root_value, &segments);

    Document::new().set(path.root(), root_value)
}

fn set_null(value: &mut Value, segments: &[&str]) {
    let Value::Map(entries) = value else {
        return;
    };

    match segments {
        [] => {}
        [leaf] => {
            entries.insert((*leaf).to_string(), Value::Null);
        }
        [head, rest @ ..] => {
            if let Some(child) = entries.get_mut(*head) {
                set_null(child, rest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_patch_on_flat_field() {
        let doc = Document::new().set("post_id", Value::Text("x".into()));
        let patch = null_patch(&doc, &FieldPath::try_from_str("post_id").unwrap());
        assert_eq!(patch.get("post_id"), Some(&Value::Null));
    }

    #[test]
    fn null_patch_on_nested_field_preserves_siblings() {
        let doc = Document::new().set(
            "meta",
            Value::Map(BTreeMap::from([
                ("owner".to_string(), Value::Text("a".into())),
                ("note".to_string(), Value::Text("keep".into())),
            ])),
        );
        let patch = null_patch(&doc, &FieldPath::try_from_str("meta.owner").unwrap());

        let Some(Value::Map(entries)) = patch.get("meta") else {
            panic!("expected map patch");
        };
        assert_eq!(entries.get("owner"), Some(&Value::Null));
        assert_eq!(entries.get("note"), Some(&Value::Text("keep".into())));
    }
}
