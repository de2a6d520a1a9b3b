use crate::identity::FieldPath;
use serde::{Deserialize, Serialize};

///
/// OnConflict
/// Resolution policy when a unique rule matches a different document.
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    /// Raise a `UniqueConstraintError`.
    Fail,
    /// Redirect the insert to replace the conflicting document.
    Replace,
}

///
/// UniqueRule
/// Single-field or composite (tuple-checked) uniqueness constraint.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UniqueRule {
    pub name: String,
    pub fields: Vec<FieldPath>,
    pub on_conflict: OnConflict,
}

impl UniqueRule {
    #[must_use]
    pub fn new(fields: Vec<FieldPath>, on_conflict: OnConflict) -> Self {
        let joined = fields
            .iter()
            .map(|f| f.as_str().replace('.', "_"))
            .collect::<Vec<_>>()
            .join("_");

        Self {
            name: format!("uniq_{joined}"),
            fields,
            on_conflict,
        }
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.fields.len() >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> FieldPath {
        FieldPath::try_from_str(s).unwrap()
    }

    #[test]
    fn rule_name_is_derived_from_fields() {
        let rule = UniqueRule::new(vec![path("tenant_id"), path("slug")], OnConflict::Fail);
        assert_eq!(rule.name, "uniq_tenant_id_slug");
        assert!(rule.is_composite());
    }

    #[test]
    fn single_field_rule_is_not_composite() {
        let rule = UniqueRule::new(vec![path("email")], OnConflict::Replace);
        assert_eq!(rule.name, "uniq_email");
        assert!(!rule.is_composite());
    }
}
