use crate::{
    db::pipeline::Operation,
    identity::TableName,
    value::{DocumentId, Value},
};
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Write},
};
use thiserror::Error as ThisError;

///
/// GateError
///
/// Structured runtime error with a stable classification and, where the
/// failure is constraint-shaped, a typed detail payload. Pipeline failures
/// additionally record the stage they surfaced from.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct GateError {
    pub class: ErrorClass,
    pub stage: Option<StageName>,
    pub message: String,

    /// Structured error detail; present for every constraint-taxonomy error.
    pub detail: Option<ErrorDetail>,
}

impl GateError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            stage: None,
            message: message.into(),
            detail: None,
        }
    }

    /// Schema check failed; carries every field's messages, not just the first.
    #[must_use]
    pub fn validation(failure: ValidationFailure) -> Self {
        Self {
            class: ErrorClass::Validation,
            stage: None,
            message: format!("validation failed: {} field(s) rejected", failure.len()),
            detail: Some(ErrorDetail::Validation(failure)),
        }
    }

    /// Conflicting value(s) on a fail-policy unique rule.
    #[must_use]
    pub fn unique_conflict(
        table: TableName,
        constraint: impl Into<String>,
        fields: Vec<String>,
        values: Vec<Value>,
        existing_id: Option<DocumentId>,
    ) -> Self {
        let constraint = constraint.into();
        Self {
            class: ErrorClass::Conflict,
            stage: None,
            message: format!(
                "unique constraint '{constraint}' violated on {table} ({})",
                fields.join(", ")
            ),
            detail: Some(ErrorDetail::UniqueConstraint {
                table,
                constraint,
                fields,
                values,
                existing_id,
            }),
        }
    }

    /// Operation required an existing document and none was found.
    #[must_use]
    pub fn not_found(table: TableName, id: DocumentId, operation: Operation) -> Self {
        Self {
            class: ErrorClass::NotFound,
            stage: None,
            message: format!("document not found: {table}/{id} ({operation})"),
            detail: Some(ErrorDetail::DocumentNotFound {
                table,
                id,
                operation,
            }),
        }
    }

    /// Delete blocked by a restrict-policy relation.
    #[must_use]
    pub fn dependent_record(
        table: TableName,
        id: DocumentId,
        dependent_table: TableName,
        dependent_field: impl Into<String>,
    ) -> Self {
        let dependent_field = dependent_field.into();
        Self {
            class: ErrorClass::Conflict,
            stage: None,
            message: format!(
                "delete of {table}/{id} blocked: {dependent_table}.{dependent_field} still references it"
            ),
            detail: Some(ErrorDetail::DependentRecord {
                table,
                id,
                dependent_table,
                dependent_field,
            }),
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvariantViolation, message)
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, message)
    }

    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, message)
    }

    /// Batch arity mismatch; raised before any store access.
    pub(crate) fn batch_mismatch(operation: Operation, ids: usize, payloads: usize) -> Self {
        Self::new(
            ErrorClass::Validation,
            format!("{operation} batch mismatch: {ids} id(s) but {payloads} payload(s)"),
        )
    }

    /// Wrap a stage failure once; nested pipeline runs keep the inner stage.
    pub(crate) fn at_stage(mut self, stage: StageName) -> Self {
        if self.stage.is_none() {
            self.message = format!("pipeline failed at stage {stage}: {}", self.message);
            self.stage = Some(stage);
        }
        self
    }

    /// Stable taxonomy label exposed to callers.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match &self.detail {
            Some(ErrorDetail::Validation(_)) => "ValidationError",
            Some(ErrorDetail::UniqueConstraint { .. }) => "UniqueConstraintError",
            Some(ErrorDetail::DocumentNotFound { .. }) => "DocumentNotFoundError",
            Some(ErrorDetail::DependentRecord { .. }) => "DependentRecordError",
            None => match self.class {
                ErrorClass::Validation => "ValidationError",
                ErrorClass::Schema => "SchemaError",
                _ => "PipelineError",
            },
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::DocumentNotFound { .. }))
    }

    /// Multi-line human-readable report.
    #[must_use]
    pub fn format_error(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", self.error_type(), self.message);

        if let Some(stage) = self.stage {
            let _ = writeln!(out, "  stage: {stage}");
        }

        match &self.detail {
            Some(ErrorDetail::Validation(failure)) => {
                for (field, messages) in &failure.field_errors {
                    for message in messages {
                        let _ = writeln!(out, "  {field}: {message}");
                    }
                }
                for message in &failure.form_errors {
                    let _ = writeln!(out, "  (document): {message}");
                }
            }
            Some(ErrorDetail::UniqueConstraint {
                fields,
                values,
                existing_id,
                ..
            }) => {
                for (field, value) in fields.iter().zip(values.iter()) {
                    let _ = writeln!(out, "  {field} = {value}");
                }
                if let Some(id) = existing_id {
                    let _ = writeln!(out, "  conflicts with existing document {id}");
                }
            }
            Some(ErrorDetail::DocumentNotFound {
                table,
                id,
                operation,
            }) => {
                let _ = writeln!(out, "  table: {table}");
                let _ = writeln!(out, "  id: {id}");
                let _ = writeln!(out, "  operation: {operation}");
            }
            Some(ErrorDetail::DependentRecord {
                dependent_table,
                dependent_field,
                ..
            }) => {
                let _ = writeln!(out, "  dependent: {dependent_table}.{dependent_field}");
                let _ = writeln!(
                    out,
                    "  action: delete dependent rows first, or change the relation's on-delete policy"
                );
            }
            None => {}
        }

        out
    }
}

///
/// ErrorDetail
///
/// Structured detail carried by [`GateError`] for the constraint taxonomy.
///

#[derive(Debug)]
pub enum ErrorDetail {
    Validation(ValidationFailure),
    UniqueConstraint {
        table: TableName,
        constraint: String,
        fields: Vec<String>,
        values: Vec<Value>,
        existing_id: Option<DocumentId>,
    },
    DocumentNotFound {
        table: TableName,
        id: DocumentId,
        operation: Operation,
    },
    DependentRecord {
        table: TableName,
        id: DocumentId,
        dependent_table: TableName,
        dependent_field: String,
    },
}

///
/// ValidationFailure
///
/// All field errors collected during one validation pass.
///

#[derive(Debug, Default)]
pub struct ValidationFailure {
    pub field_errors: BTreeMap<String, Vec<String>>,
    pub form_errors: Vec<String>,
}

impl ValidationFailure {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_field(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn push_form(&mut self, message: impl Into<String>) {
        self.form_errors.push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.field_errors.is_empty() && self.form_errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.field_errors.len() + self.form_errors.len()
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    NotFound,
    Schema,
    Internal,
    Unsupported,
    InvariantViolation,
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Schema => "schema",
            Self::Internal => "internal",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
        };
        f.write_str(label)
    }
}

///
/// StageName
/// The pipeline stage an error surfaced from.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageName {
    Parse,
    Restrictions,
    Relations,
    BeforeHooks,
    Execute,
    AfterHooks,
}

impl Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Parse => "parse",
            Self::Restrictions => "restrictions",
            Self::Relations => "relations",
            Self::BeforeHooks => "before_hooks",
            Self::Execute => "execute",
            Self::AfterHooks => "after_hooks",
        };
        f.write_str(label)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableName {
        TableName::try_from_str(name).unwrap()
    }

    #[test]
    fn stage_wrapping_is_applied_once() {
        let err = GateError::invariant("boom")
            .at_stage(StageName::Restrictions)
            .at_stage(StageName::Execute);

        assert_eq!(err.stage, Some(StageName::Restrictions));
        assert_eq!(err.message, "pipeline failed at stage restrictions: boom");
    }

    #[test]
    fn validation_report_lists_every_field() {
        let mut failure = ValidationFailure::new();
        failure.push_field("email", "must be text");
        failure.push_field("email", "is required");
        failure.push_field("age", "must be int");

        let report = GateError::validation(failure).format_error();
        assert!(report.starts_with("ValidationError:"));
        assert!(report.contains("email: must be text"));
        assert!(report.contains("email: is required"));
        assert!(report.contains("age: must be int"));
    }

    #[test]
    fn unique_report_names_conflicting_values() {
        let err = GateError::unique_conflict(
            table("users"),
            "uniq_email",
            vec!["email".to_string()],
            vec![Value::Text("a@b.c".into())],
            Some(DocumentId::generate()),
        );

        assert_eq!(err.error_type(), "UniqueConstraintError");
        let report = err.format_error();
        assert!(report.contains("email = 'a@b.c'"));
        assert!(report.contains("conflicts with existing document"));
    }

    #[test]
    fn dependent_record_report_is_actionable() {
        let err = GateError::dependent_record(
            table("posts"),
            DocumentId::generate(),
            table("comments"),
            "post_id",
        );

        assert_eq!(err.error_type(), "DependentRecordError");
        let report = err.format_error();
        assert!(report.contains("dependent: comments.post_id"));
        assert!(report.contains("on-delete policy"));
    }

    #[test]
    fn not_found_report_names_operation() {
        let err = GateError::not_found(table("users"), DocumentId::generate(), Operation::Patch);
        assert_eq!(err.error_type(), "DocumentNotFoundError");
        assert!(err.is_not_found());
        assert!(err.format_error().contains("operation: patch"));
    }
}
