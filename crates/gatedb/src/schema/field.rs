use crate::{identity::TableName, value::Value};
use std::{fmt, sync::Arc};

///
/// FieldKind
///
/// Declared type shape of a document field. Aligned with `Value` variants;
/// `Any` opts a field out of type checking entirely.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Any,
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Ref(TableName),
    List,
    Map,
}

impl FieldKind {
    /// Whether a runtime value satisfies this declared kind.
    #[must_use]
    pub const fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _)
            | (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::Text, Value::Text(_))
            | (Self::Timestamp, Value::Timestamp(_))
            | (Self::Ref(_), Value::Ref(_))
            | (Self::List, Value::List(_))
            | (Self::Map, Value::Map(_)) => true,
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    /// Label used in validation messages and the schema export.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
            Self::Ref(_) => "ref",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

/// Per-field check run after kind matching; returns a message on rejection.
pub type FieldCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

///
/// FieldSpec
///

#[derive(Clone)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub optional: bool,
    pub check: Option<FieldCheck>,
}

impl FieldSpec {
    #[must_use]
    pub const fn required(kind: FieldKind) -> Self {
        Self {
            kind,
            optional: false,
            check: None,
        }
    }

    #[must_use]
    pub const fn optional(kind: FieldKind) -> Self {
        Self {
            kind,
            optional: true,
            check: None,
        }
    }

    #[must_use]
    pub fn with_check(
        mut self,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("kind", &self.kind)
            .field("optional", &self.optional)
            .field("check", &self.check.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TableName;

    #[test]
    fn kind_matching_is_exact() {
        assert!(FieldKind::Int.matches(&Value::Int(1)));
        assert!(!FieldKind::Int.matches(&Value::Float(1.0)));
        assert!(!FieldKind::Text.matches(&Value::Null));
        assert!(FieldKind::Any.matches(&Value::Null));
    }

    #[test]
    fn ref_kind_matches_any_ref() {
        let kind = FieldKind::Ref(TableName::try_from_str("posts").unwrap());
        assert!(kind.is_ref());
        assert!(kind.matches(&Value::Ref(crate::value::DocumentId::generate())));
        assert!(!kind.matches(&Value::Text("posts:1".into())));
    }

    #[test]
    fn field_check_runs_after_kind() {
        let spec = FieldSpec::required(FieldKind::Text).with_check(|v| match v {
            Value::Text(s) if s.contains('@') => Ok(()),
            _ => Err("must contain '@'".to_string()),
        });

        let check = spec.check.as_ref().unwrap();
        assert!(check(&Value::Text("a@b".into())).is_ok());
        assert_eq!(
            check(&Value::Text("ab".into())).unwrap_err(),
            "must contain '@'"
        );
    }
}
