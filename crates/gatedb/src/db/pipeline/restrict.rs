//! Restriction stage: uniqueness checks via indexed point-lookups, with
//! fail-vs-replace conflict resolution.
//!
//! Phase discipline follows the save executor rule: this stage never
//! mutates the store, so a rejected mutation leaves no partial state.

use crate::{
    db::{pipeline::{Operation, OperationContext}, store::Datastore},
    error::GateError,
    obs::sink::{self, MetricsEvent},
    schema::{registry::SchemaRegistry, unique::OnConflict},
};

pub(super) fn run(
    registry: &SchemaRegistry,
    store: &dyn Datastore,
    ctx: &mut OperationContext,
) -> Result<(), GateError> {
    let model = registry.get(&ctx.table).ok_or_else(|| {
        GateError::invariant(format!("table missing in restriction stage: {}", ctx.table))
    })?;

    for rule in model.uniques() {
        // A patch that did not touch any rule field cannot introduce a new
        // conflict; the only possible match is the document itself.
        if ctx.operation == Operation::Patch
            && rule
                .fields
                .iter()
                .all(|f| !ctx.patched_fields.contains(f.root()))
        {
            continue;
        }

        // Rules with any unset (or null) candidate field are skipped.
        let mut values = Vec::with_capacity(rule.fields.len());
        let mut all_present = true;
        for field in &rule.fields {
            match ctx.document.get_path(field) {
                Some(value) if !value.is_null() => values.push(value.clone()),
                _ => {
                    all_present = false;
                    break;
                }
            }
        }
        if !all_present {
            continue;
        }

        // Backing index exists by build-time invariant.
        let index = model.index_covering(&rule.fields).ok_or_else(|| {
            GateError::invariant(format!(
                "unique rule '{}' on {} has no backing index",
                rule.name, ctx.table
            ))
        })?;

        // Use the longest leading index prefix made of rule fields, then
        // equality-filter the remaining rule fields.
        let mut prefix = Vec::new();
        for field in &index.fields {
            match rule.fields.iter().position(|f| f == field) {
                Some(pos) => prefix.push(values[pos].clone()),
                None => break,
            }
        }

        let conflict = store
            .scan_index(&ctx.table, &index.name, &prefix)
            .into_iter()
            .find(|(id, doc)| {
                // A match against the document being updated is not a conflict.
                Some(*id) != ctx.target
                    && rule
                        .fields
                        .iter()
                        .zip(values.iter())
                        .all(|(field, value)| doc.get_path(field) == Some(value))
            });

        if let Some((existing_id, _)) = conflict {
            // Redirect semantics apply to inserts only; a patch or replace
            // colliding with a different document is always a conflict.
            if rule.on_conflict == OnConflict::Replace && ctx.operation == Operation::Insert {
                ctx.operation = Operation::Replace;
                ctx.target = Some(existing_id);
                continue;
            }

            sink::record(&MetricsEvent::UniqueViolation {
                table: ctx.table.as_str().to_string(),
            });

            return Err(GateError::unique_conflict(
                ctx.table.clone(),
                rule.name.clone(),
                rule.fields
                    .iter()
                    .map(|f| f.as_str().to_string())
                    .collect(),
                values,
                Some(existing_id),
            ));
        }
    }

    Ok(())
}
