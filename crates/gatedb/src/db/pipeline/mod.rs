//! Mutation pipeline.
//!
//! Every write runs the same ordered stages: parse, restrictions,
//! relations, before-hooks, execute, after-hooks. Stages before execute
//! never mutate the store, so any rejection leaves state untouched.
//! Deletes skip parse and restrictions and run the relation engine
//! instead.

mod parse;
mod restrict;


use crate::{
    db::{
        hooks::{self, HookAction, HookCtx},
        relation,
        store::Datastore,
    },
    error::{GateError, StageName},
    identity::TableName,
    obs::sink::{self, MetricsEvent},
    schema::registry::SchemaRegistry,
    value::{Document, DocumentId},
};
use derive_more::Display;
use std::collections::BTreeSet;

///
/// Operation
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Operation {
    #[display("insert")]
    Insert,
    #[display("patch")]
    Patch,
    #[display("replace")]
    Replace,
    #[display("delete")]
    Delete,
}

///
/// StageConfig
///
/// Which stages a run executes. Defaults come from the operation;
/// callers may override individual stages per run.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StageConfig {
    pub parse: bool,
    pub restrictions: bool,
    pub relations: bool,
    pub before_hooks: bool,
    pub execute: bool,
    pub after_hooks: bool,
}

impl StageConfig {
    #[must_use]
    pub const fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Delete => Self {
                parse: false,
                restrictions: false,
                relations: true,
                before_hooks: true,
                execute: true,
                after_hooks: true,
            },
            // Relation enforcement only has work to do on delete, but the
            // write defaults still carry every stage enabled.
            Operation::Insert | Operation::Patch | Operation::Replace => Self {
                parse: true,
                restrictions: true,
                relations: true,
                before_hooks: true,
                execute: true,
                after_hooks: true,
            },
        }
    }

    #[must_use]
    pub fn merged(self, overrides: StageOverrides) -> Self {
        Self {
            parse: overrides.parse.unwrap_or(self.parse),
            restrictions: overrides.restrictions.unwrap_or(self.restrictions),
            relations: overrides.relations.unwrap_or(self.relations),
            before_hooks: overrides.before_hooks.unwrap_or(self.before_hooks),
            execute: overrides.execute.unwrap_or(self.execute),
            after_hooks: overrides.after_hooks.unwrap_or(self.after_hooks),
        }
    }
}

///
/// StageOverrides
/// Per-run stage toggles; `None` keeps the operation default.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StageOverrides {
    pub parse: Option<bool>,
    pub restrictions: Option<bool>,
    pub relations: Option<bool>,
    pub before_hooks: Option<bool>,
    pub execute: Option<bool>,
    pub after_hooks: Option<bool>,
}

impl StageOverrides {
    #[must_use]
    pub const fn parse(mut self, on: bool) -> Self {
        self.parse = Some(on);
        self
    }

    #[must_use]
    pub const fn restrictions(mut self, on: bool) -> Self {
        self.restrictions = Some(on);
        self
    }

    #[must_use]
    pub const fn relations(mut self, on: bool) -> Self {
        self.relations = Some(on);
        self
    }

    #[must_use]
    pub const fn before_hooks(mut self, on: bool) -> Self {
        self.before_hooks = Some(on);
        self
    }

    #[must_use]
    pub const fn execute(mut self, on: bool) -> Self {
        self.execute = Some(on);
        self
    }

    #[must_use]
    pub const fn after_hooks(mut self, on: bool) -> Self {
        self.after_hooks = Some(on);
        self
    }
}

///
/// OperationContext
///
/// Mutable state threaded through the stages of one run. Stages may
/// rewrite the working document, the target id, and even the operation
/// itself (replace-policy conflict redirection).
///

#[derive(Debug)]
pub struct OperationContext {
    pub table: TableName,
    pub operation: Operation,
    pub document: Document,
    pub target: Option<DocumentId>,
    /// Top-level fields a patch actually changes; drives write narrowing
    /// and field-hook scoping. Unused by insert and replace.
    pub patched_fields: BTreeSet<String>,
    pub config: StageConfig,
}

///
/// MutationPipeline
///
/// Borrows the registry and the store for the duration of a mutation.
/// Batch variants run per item, fail-fast: earlier successes are kept,
/// the failing item's error is returned, later items never run.
///

pub struct MutationPipeline<'a> {
    pub(crate) registry: &'a SchemaRegistry,
    pub(crate) store: &'a mut dyn Datastore,
}

impl<'a> MutationPipeline<'a> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a mut dyn Datastore) -> Self {
        Self { registry, store }
    }

    pub fn insert(&mut self, table: &str, doc: Document) -> Result<DocumentId, GateError> {
        self.insert_with(table, doc, StageOverrides::default())
    }

    pub fn insert_with(
        &mut self,
        table: &str,
        doc: Document,
        overrides: StageOverrides,
    ) -> Result<DocumentId, GateError> {
        let ctx = self.write_ctx(table, Operation::Insert, doc, None, overrides)?;
        self.run_write(ctx)
    }

    pub fn insert_many(
        &mut self,
        table: &str,
        docs: Vec<Document>,
    ) -> Result<Vec<DocumentId>, GateError> {
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            ids.push(self.insert(table, doc)?);
        }
        Ok(ids)
    }

    pub fn patch(
        &mut self,
        table: &str,
        id: DocumentId,
        fields: Document,
    ) -> Result<DocumentId, GateError> {
        self.patch_with(table, id, fields, StageOverrides::default())
    }

    pub fn patch_with(
        &mut self,
        table: &str,
        id: DocumentId,
        fields: Document,
        overrides: StageOverrides,
    ) -> Result<DocumentId, GateError> {
        let mut ctx = self.write_ctx(table, Operation::Patch, fields, Some(id), overrides)?;
        // With parse disabled nothing recomputes the diff, so the incoming
        // field set is the write set.
        if !ctx.config.parse {
            ctx.patched_fields = ctx.document.field_names().cloned().collect();
        }
        self.run_write(ctx)
    }

    pub fn patch_many(
        &mut self,
        table: &str,
        ids: &[DocumentId],
        payloads: Vec<Document>,
    ) -> Result<Vec<DocumentId>, GateError> {
        self.patch_many_with(table, ids, payloads, StageOverrides::default())
    }

    pub fn patch_many_with(
        &mut self,
        table: &str,
        ids: &[DocumentId],
        payloads: Vec<Document>,
        overrides: StageOverrides,
    ) -> Result<Vec<DocumentId>, GateError> {
        if ids.len() != payloads.len() {
            return Err(GateError::batch_mismatch(
                Operation::Patch,
                ids.len(),
                payloads.len(),
            ));
        }

        let mut out = Vec::with_capacity(ids.len());
        for (id, payload) in ids.iter().zip(payloads) {
            out.push(self.patch_with(table, *id, payload, overrides)?);
        }
        Ok(out)
    }

    pub fn replace(
        &mut self,
        table: &str,
        id: DocumentId,
        doc: Document,
    ) -> Result<DocumentId, GateError> {
        self.replace_with(table, id, doc, StageOverrides::default())
    }

    pub fn replace_with(
        &mut self,
        table: &str,
        id: DocumentId,
        doc: Document,
        overrides: StageOverrides,
    ) -> Result<DocumentId, GateError> {
        let ctx = self.write_ctx(table, Operation::Replace, doc, Some(id), overrides)?;
        self.run_write(ctx)
    }

    pub fn replace_many(
        &mut self,
        table: &str,
        ids: &[DocumentId],
        payloads: Vec<Document>,
    ) -> Result<Vec<DocumentId>, GateError> {
        self.replace_many_with(table, ids, payloads, StageOverrides::default())
    }

    pub fn replace_many_with(
        &mut self,
        table: &str,
        ids: &[DocumentId],
        payloads: Vec<Document>,
        overrides: StageOverrides,
    ) -> Result<Vec<DocumentId>, GateError> {
        if ids.len() != payloads.len() {
            return Err(GateError::batch_mismatch(
                Operation::Replace,
                ids.len(),
                payloads.len(),
            ));
        }

        let mut out = Vec::with_capacity(ids.len());
        for (id, payload) in ids.iter().zip(payloads) {
            out.push(self.replace_with(table, *id, payload, overrides)?);
        }
        Ok(out)
    }

    pub fn delete(&mut self, table: &str, id: DocumentId) -> Result<DocumentId, GateError> {
        self.delete_with(table, id, StageOverrides::default())
    }

    pub fn delete_with(
        &mut self,
        table: &str,
        id: DocumentId,
        overrides: StageOverrides,
    ) -> Result<DocumentId, GateError> {
        let table = self.registry.try_get(table)?.name().clone();
        let mut visited = BTreeSet::new();
        self.delete_recursive(&table, id, overrides, 0, &mut visited)
    }

    pub fn delete_many(
        &mut self,
        table: &str,
        ids: &[DocumentId],
    ) -> Result<Vec<DocumentId>, GateError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.delete(table, *id)?);
        }
        Ok(out)
    }

    fn write_ctx(
        &self,
        table: &str,
        operation: Operation,
        document: Document,
        target: Option<DocumentId>,
        overrides: StageOverrides,
    ) -> Result<OperationContext, GateError> {
        let model = self.registry.try_get(table)?;

        Ok(OperationContext {
            table: model.name().clone(),
            operation,
            document,
            target,
            patched_fields: BTreeSet::new(),
            config: StageConfig::for_operation(operation).merged(overrides),
        })
    }

    fn run_write(&mut self, mut ctx: OperationContext) -> Result<DocumentId, GateError> {
        let registry = self.registry;

        sink::record(&MetricsEvent::PipelineStart {
            table: ctx.table.as_str().to_string(),
            operation: ctx.operation,
        });

        if ctx.config.parse {
            parse::run(registry, &*self.store, &mut ctx)
                .map_err(|err| err.at_stage(StageName::Parse))?;

            // Empty patch diff: nothing to write, no hooks, target unchanged.
            if ctx.operation == Operation::Patch && ctx.patched_fields.is_empty() {
                sink::record(&MetricsEvent::PatchNoop {
                    table: ctx.table.as_str().to_string(),
                });
                return ctx
                    .target
                    .ok_or_else(|| GateError::invariant("patch without target id"));
            }
        }

        if ctx.config.restrictions {
            restrict::run(registry, &*self.store, &mut ctx)
                .map_err(|err| err.at_stage(StageName::Restrictions))?;
        }

        let model = registry
            .get(&ctx.table)
            .ok_or_else(|| GateError::invariant(format!("table missing: {}", ctx.table)))?;

        let action = if ctx.operation == Operation::Insert {
            HookAction::Insert
        } else {
            HookAction::Update
        };
        let patch_scoped = ctx.operation == Operation::Patch;

        if ctx.config.before_hooks {
            let doc = std::mem::take(&mut ctx.document);
            let hook_ctx = HookCtx {
                table: &ctx.table,
                action,
                id: ctx.target,
            };
            let doc = hooks::run_before(model, &hook_ctx, patch_scoped, &mut ctx.patched_fields, doc)
                .map_err(|err| err.at_stage(StageName::BeforeHooks))?;
            drop(hook_ctx);
            ctx.document = doc;
        }

        if ctx.config.execute {
            match ctx.operation {
                Operation::Insert => {
                    let id = self
                        .store
                        .insert(&ctx.table, ctx.document.clone())
                        .map_err(|err| err.at_stage(StageName::Execute))?;
                    ctx.target = Some(id);
                }
                Operation::Replace => {
                    let id = ctx
                        .target
                        .ok_or_else(|| GateError::invariant("replace without target id"))?;
                    self.store
                        .replace(&ctx.table, id, ctx.document.clone())
                        .map_err(|err| err.at_stage(StageName::Execute))?;
                }
                Operation::Patch => {
                    let id = ctx
                        .target
                        .ok_or_else(|| GateError::invariant("patch without target id"))?;
                    let narrowed = ctx.document.restricted_to(&ctx.patched_fields);
                    self.store
                        .patch(&ctx.table, id, narrowed)
                        .map_err(|err| err.at_stage(StageName::Execute))?;
                }
                Operation::Delete => {
                    return Err(GateError::invariant("delete reached the write runner"));
                }
            }
        }

        // Without execute an insert has no identity to report.
        let id = ctx.target.ok_or_else(|| {
            GateError::unsupported("insert with the execute stage disabled yields no document id")
        })?;

        if ctx.config.after_hooks {
            let hook_ctx = HookCtx {
                table: &ctx.table,
                action,
                id: Some(id),
            };
            hooks::run_after(model, &hook_ctx, patch_scoped, &ctx.patched_fields, &ctx.document);
        }

        sink::record(&MetricsEvent::PipelineFinish {
            table: ctx.table.as_str().to_string(),
            operation: ctx.operation,
        });

        Ok(id)
    }

    pub(crate) fn delete_recursive(
        &mut self,
        table: &TableName,
        id: DocumentId,
        overrides: StageOverrides,
        depth: usize,
        visited: &mut BTreeSet<(TableName, DocumentId)>,
    ) -> Result<DocumentId, GateError> {
        let registry = self.registry;
        let model = registry
            .get(table)
            .ok_or_else(|| GateError::invariant(format!("table missing: {table}")))?;
        let config = StageConfig::for_operation(Operation::Delete).merged(overrides);

        let Some(document) = self.store.get(table, id) else {
            return Err(GateError::not_found(table.clone(), id, Operation::Delete));
        };
        visited.insert((table.clone(), id));

        sink::record(&MetricsEvent::PipelineStart {
            table: table.as_str().to_string(),
            operation: Operation::Delete,
        });

        if config.relations {
            relation::enforce_on_delete(self, table, id, depth, visited)
                .map_err(|err| err.at_stage(StageName::Relations))?;
        }

        if config.before_hooks {
            let hook_ctx = HookCtx {
                table,
                action: HookAction::Delete,
                id: Some(id),
            };
            let mut patched = BTreeSet::new();
            // Delete hooks see the stored document; transforms are ignored.
            hooks::run_before(model, &hook_ctx, false, &mut patched, document.clone())
                .map_err(|err| err.at_stage(StageName::BeforeHooks))?;
        }

        if config.execute {
            self.store
                .delete(table, id)
                .map_err(|err| err.at_stage(StageName::Execute))?;
        }

        if config.after_hooks {
            let hook_ctx = HookCtx {
                table,
                action: HookAction::Delete,
                id: Some(id),
            };
            hooks::run_after(model, &hook_ctx, false, &BTreeSet::new(), &document);
        }

        sink::record(&MetricsEvent::PipelineFinish {
            table: table.as_str().to_string(),
            operation: Operation::Delete,
        });

        Ok(id)
    }
}
