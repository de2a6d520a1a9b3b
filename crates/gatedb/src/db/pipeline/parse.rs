//! Parse stage: validation-rule dispatch, default application, and the
//! patch field-diff that drives write narrowing.

use crate::{
    db::{pipeline::{Operation, OperationContext}, store::Datastore},
    error::{GateError, ValidationFailure},
    schema::{
        registry::SchemaRegistry,
        table::{TableModel, ValidationCtx, ValidationRule},
    },
    value::Document,
};
use std::collections::BTreeSet;

pub(super) fn run(
    registry: &SchemaRegistry,
    store: &dyn Datastore,
    ctx: &mut OperationContext,
) -> Result<(), GateError> {
    let model = registry
        .get(&ctx.table)
        .ok_or_else(|| GateError::invariant(format!("table missing in parse stage: {}", ctx.table)))?;

    match ctx.operation {
        Operation::Insert => {
            apply_defaults(model, &mut ctx.document);
            validate_document(model, store, ctx, None)?;
        }
        Operation::Replace => {
            let id = ctx
                .target
                .ok_or_else(|| GateError::invariant("replace without target id"))?;
            if store.get(&ctx.table, id).is_none() {
                return Err(GateError::not_found(ctx.table.clone(), id, Operation::Replace));
            }
            validate_document(model, store, ctx, None)?;
        }
        Operation::Patch => {
            let id = ctx
                .target
                .ok_or_else(|| GateError::invariant("patch without target id"))?;
            let Some(stored) = store.get(&ctx.table, id) else {
                return Err(GateError::not_found(ctx.table.clone(), id, Operation::Patch));
            };

            // Narrow to the fields whose incoming value differs from the
            // stored one; an empty diff short-circuits the whole pipeline.
            let changed = stored.changed_fields(&ctx.document);
            ctx.document = stored.merged_with(&ctx.document);
            ctx.patched_fields = changed;

            if !ctx.patched_fields.is_empty() {
                let scope = ctx.patched_fields.clone();
                validate_document(model, store, ctx, Some(&scope))?;
            }
        }
        // No body to parse; delete is handled by its own runner.
        Operation::Delete => {}
    }

    Ok(())
}

/// Fill declared defaults for absent fields. Computed defaults are invoked
/// here, at mutation time.
pub(super) fn apply_defaults(model: &TableModel, doc: &mut Document) {
    for (field, default) in model.defaults() {
        if !doc.contains(field) {
            doc.put(field, default.materialize());
        }
    }
}

fn validate_document(
    model: &TableModel,
    store: &dyn Datastore,
    ctx: &OperationContext,
    scope: Option<&BTreeSet<String>>,
) -> Result<(), GateError> {
    match model.validation() {
        ValidationRule::None => Ok(()),
        ValidationRule::Schema => schema_validate(model, &ctx.document, scope),
        ValidationRule::Function(f) => {
            // Function rules run post-merge against a full persisted-shape
            // document and may read the database.
            if let Some(id) = ctx.target
                && store.get(&ctx.table, id).is_none()
            {
                return Err(GateError::not_found(ctx.table.clone(), id, ctx.operation));
            }

            let validation_ctx = ValidationCtx {
                table: &ctx.table,
                store,
            };
            f(&validation_ctx, &ctx.document).map_err(GateError::validation)
        }
    }
}

/// Field-by-field schema check, collecting every failure rather than
/// stopping at the first.
fn schema_validate(
    model: &TableModel,
    doc: &Document,
    scope: Option<&BTreeSet<String>>,
) -> Result<(), GateError> {
    let in_scope = |field: &str| scope.is_none_or(|s| s.contains(field));
    let mut failure = ValidationFailure::new();

    for (field, spec) in model.fields() {
        if !in_scope(field) {
            continue;
        }

        match doc.get(field) {
            None => {
                // Absent fields only matter on full-document validation.
                if !spec.optional && scope.is_none() {
                    failure.push_field(field, "is required");
                }
            }
            Some(value) if value.is_null() => {
                if !spec.optional {
                    failure.push_field(field, "is required");
                }
            }
            Some(value) => {
                if spec.kind.matches(value) {
                    if let Some(check) = &spec.check
                        && let Err(message) = check(value)
                    {
                        failure.push_field(field, message);
                    }
                } else {
                    failure.push_field(
                        field,
                        format!(
                            "expected {}, got {}",
                            spec.kind.label(),
                            value.type_label()
                        ),
                    );
                }
            }
        }
    }

    for field in doc.field_names() {
        if in_scope(field) && model.field(field).is_none() {
            failure.push_field(field, "is not declared in the schema");
        }
    }

    if failure.is_empty() {
        Ok(())
    } else {
        Err(GateError::validation(failure))
    }
}
