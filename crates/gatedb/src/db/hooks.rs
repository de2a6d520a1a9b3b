//! Hook dispatch.
//!
//! One ordered resolution list per run: table-level hooks first, then
//! field-level hooks, each in declaration order. Field-level hooks are
//! scoped: during a patch they only run when their field actually changed.

use crate::{
    error::GateError,
    identity::TableName,
    schema::table::TableModel,
    value::{Document, DocumentId},
};
use derive_more::Display;
use std::{collections::BTreeSet, sync::Arc};

///
/// HookAction
/// Patch and replace both surface as `Update` to hook authors.
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum HookAction {
    #[display("insert")]
    Insert,
    #[display("update")]
    Update,
    #[display("delete")]
    Delete,
}

///
/// HookCtx
///

pub struct HookCtx<'a> {
    pub table: &'a TableName,
    pub action: HookAction,
    /// Target id; absent for an insert that has not executed yet.
    pub id: Option<DocumentId>,
}

/// Before-hooks transform the working document; their return replaces it.
/// Hooks may add or rewrite fields; dropping a field is not a supported
/// transform (a patch only writes fields still present in the document,
/// so the removal is silently ignored).
pub type BeforeHook =
    Arc<dyn Fn(&HookCtx<'_>, Document) -> Result<Document, GateError> + Send + Sync>;

/// After-hooks observe the final document and return nothing.
pub type AfterHook = Arc<dyn Fn(&HookCtx<'_>, &Document) + Send + Sync>;

/// Run before-hooks in resolution order, reflecting any hook-made field
/// change into `patched_fields` so a hook-only change still writes.
/// The diff only sees fields present in the hook output; see [`BeforeHook`]
/// for the no-removal contract.
pub(crate) fn run_before(
    model: &TableModel,
    ctx: &HookCtx<'_>,
    patch_scoped: bool,
    patched_fields: &mut BTreeSet<String>,
    document: Document,
) -> Result<Document, GateError> {
    let before = document.clone();
    let mut doc = document;

    for hook in &model.table_before {
        doc = hook(ctx, doc)?;
    }
    for (field, hook) in &model.field_before {
        if !patch_scoped || patched_fields.contains(field) {
            doc = hook(ctx, doc)?;
        }
    }

    for field in before.changed_fields(&doc) {
        patched_fields.insert(field);
    }

    Ok(doc)
}

/// Run after-hooks in resolution order.
pub(crate) fn run_after(
    model: &TableModel,
    ctx: &HookCtx<'_>,
    patch_scoped: bool,
    patched_fields: &BTreeSet<String>,
    document: &Document,
) {
    for hook in &model.table_after {
        hook(ctx, document);
    }
    for (field, hook) in &model.field_after {
        if !patch_scoped || patched_fields.contains(field) {
            hook(ctx, document);
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schema::{
            field::{FieldKind, FieldSpec},
            table::TableBuilder,
        },
        value::Value,
    };
    use std::sync::{Mutex, OnceLock};

    fn order_log() -> &'static Mutex<Vec<&'static str>> {
        static LOG: OnceLock<Mutex<Vec<&'static str>>> = OnceLock::new();
        LOG.get_or_init(|| Mutex::new(Vec::new()))
    }

    #[test]
    fn table_hooks_run_before_field_hooks_in_declaration_order() {
        order_log().lock().unwrap().clear();

        let model = TableBuilder::new("notes")
            .field("body", FieldSpec::required(FieldKind::Text))
            .field("tag", FieldSpec::optional(FieldKind::Text))
            .field_before_hook("body", |_, doc| {
                order_log().lock().unwrap().push("field_body");
                Ok(doc)
            })
            .before_hook(|_, doc| {
                order_log().lock().unwrap().push("table_1");
                Ok(doc)
            })
            .before_hook(|_, doc| {
                order_log().lock().unwrap().push("table_2");
                Ok(doc)
            })
            .build()
            .unwrap();

        let table = TableName::try_from_str("notes").unwrap();
        let ctx = HookCtx {
            table: &table,
            action: HookAction::Insert,
            id: None,
        };
        let mut patched = BTreeSet::new();
        run_before(&model, &ctx, false, &mut patched, Document::new()).unwrap();

        assert_eq!(
            order_log().lock().unwrap().as_slice(),
            &["table_1", "table_2", "field_body"]
        );
    }

    #[test]
    fn hook_mutations_are_reflected_into_patched_fields() {
        let model = TableBuilder::new("notes")
            .field("body", FieldSpec::required(FieldKind::Text))
            .field("revised", FieldSpec::optional(FieldKind::Bool))
            .before_hook(|_, doc| Ok(doc.set("revised", Value::Bool(true))))
            .build()
            .unwrap();

        let table = TableName::try_from_str("notes").unwrap();
        let ctx = HookCtx {
            table: &table,
            action: HookAction::Update,
            id: None,
        };

        let mut patched = BTreeSet::from(["body".to_string()]);
        let doc = Document::new().set("body", "hi");
        let out = run_before(&model, &ctx, true, &mut patched, doc).unwrap();

        assert_eq!(out.get("revised"), Some(&Value::Bool(true)));
        assert!(patched.contains("revised"));
    }

    #[test]
    fn field_hooks_are_patch_scoped() {
        let model = TableBuilder::new("notes")
            .field("body", FieldSpec::required(FieldKind::Text))
            .field("tag", FieldSpec::optional(FieldKind::Text))
            .field_before_hook("tag", |_, doc| Ok(doc.set("tag", "hooked")))
            .build()
            .unwrap();

        let table = TableName::try_from_str("notes").unwrap();
        let ctx = HookCtx {
            table: &table,
            action: HookAction::Update,
            id: None,
        };

        // Patch that did not touch `tag`: its field hook must not fire.
        let mut patched = BTreeSet::from(["body".to_string()]);
        let out = run_before(
            &model,
            &ctx,
            true,
            &mut patched,
            Document::new().set("body", "hi"),
        )
        .unwrap();
        assert_eq!(out.get("tag"), None);

        // Patch that did touch `tag`: hook fires.
        let mut patched = BTreeSet::from(["tag".to_string()]);
        let out = run_before(
            &model,
            &ctx,
            true,
            &mut patched,
            Document::new().set("tag", "draft"),
        )
        .unwrap();
        assert_eq!(out.get("tag"), Some(&Value::Text("hooked".into())));
    }
}
