//! Identity invariants and construction.
//!
//! Invariants:
//! - Identities are ASCII, non-empty, and bounded by MAX_* limits.
//! - All construction paths validate (or sanitize into) the invariants.
//! - Index names always match `^[A-Za-z][A-Za-z0-9_]{0,63}$`.

use crate::MAX_FIELD_PATH_DEPTH;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use thiserror::Error as ThisError;

///
/// Constants
///

pub const MAX_TABLE_NAME_LEN: usize = 64;
pub const MAX_INDEX_NAME_LEN: usize = 64;

///
/// TableNameError
///

#[derive(Debug, ThisError)]
pub enum TableNameError {
    #[error("table name is empty")]
    Empty,

    #[error("table name length {len} exceeds max {max}")]
    TooLong { len: usize, max: usize },

    #[error("table name '{name}' must start with an ASCII letter")]
    InvalidLeadingChar { name: String },

    #[error("table name '{name}' contains invalid character '{ch}'")]
    InvalidChar { name: String, ch: char },
}

///
/// FieldPathError
///

#[derive(Debug, ThisError)]
pub enum FieldPathError {
    #[error("field path is empty")]
    Empty,

    #[error("field path '{path}' has an empty segment")]
    EmptySegment { path: String },

    #[error("field path '{path}' depth {depth} exceeds max {max}")]
    TooDeep {
        path: String,
        depth: usize,
        max: usize,
    },

    #[error("field path '{path}' contains invalid character '{ch}'")]
    InvalidChar { path: String, ch: char },
}

///
/// TableName
///

#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    pub fn try_from_str(name: &str) -> Result<Self, TableNameError> {
        if name.is_empty() {
            return Err(TableNameError::Empty);
        }
        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(TableNameError::TooLong {
                len: name.len(),
                max: MAX_TABLE_NAME_LEN,
            });
        }

        let mut chars = name.chars();
        let first = chars.next().unwrap_or_default();
        if !first.is_ascii_alphabetic() {
            return Err(TableNameError::InvalidLeadingChar {
                name: name.to_string(),
            });
        }
        for ch in chars {
            if !(ch.is_ascii_alphanumeric() || ch == '_') {
                return Err(TableNameError::InvalidChar {
                    name: name.to_string(),
                    ch,
                });
            }
        }

        Ok(Self(name.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

///
/// IndexName
///
/// Always produced through sanitation; there is no fallible constructor
/// because every input can be coerced into a legal name.
///

#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct IndexName(String);

impl IndexName {
    /// Derive the canonical name for a plain index over `fields`.
    #[must_use]
    pub fn derived(fields: &[FieldPath]) -> Self {
        let joined = fields
            .iter()
            .map(|f| f.as_str().replace('.', "_"))
            .collect::<Vec<_>>()
            .join("_");

        Self::sanitized(&format!("by_{joined}"))
    }

    /// Coerce an arbitrary string into a legal index name.
    ///
    /// Every non-`[A-Za-z0-9_]` character becomes `_`, a non-letter leading
    /// character gets an `idx_` prefix, and the result is clamped to 64.
    #[must_use]
    pub fn sanitized(raw: &str) -> Self {
        let mut out = String::with_capacity(raw.len());
        for ch in raw.chars() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                out.push(ch);
            } else {
                out.push('_');
            }
        }

        if !out.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            out.insert_str(0, "idx_");
        }
        out.truncate(MAX_INDEX_NAME_LEN);

        Self(out)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

///
/// FieldPath
///
/// Dotted accessor into a document, bounded at MAX_FIELD_PATH_DEPTH segments.
///

#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn try_from_str(path: &str) -> Result<Self, FieldPathError> {
        if path.is_empty() {
            return Err(FieldPathError::Empty);
        }

        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() > MAX_FIELD_PATH_DEPTH {
            return Err(FieldPathError::TooDeep {
                path: path.to_string(),
                depth: segments.len(),
                max: MAX_FIELD_PATH_DEPTH,
            });
        }

        for segment in &segments {
            if segment.is_empty() {
                return Err(FieldPathError::EmptySegment {
                    path: path.to_string(),
                });
            }
            for ch in segment.chars() {
                if !(ch.is_ascii_alphanumeric() || ch == '_') {
                    return Err(FieldPathError::InvalidChar {
                        path: path.to_string(),
                        ch,
                    });
                }
            }
        }

        Ok(Self(path.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Top-level field this path enters through.
    #[must_use]
    pub fn root(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.0.contains('.')
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a field name is reserved for the hosting store.
#[must_use]
pub fn is_system_field(name: &str) -> bool {
    name.starts_with('_')
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn is_legal_index_name(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        first.is_ascii_alphabetic()
            && name.len() <= MAX_INDEX_NAME_LEN
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    #[test]
    fn table_name_roundtrip() {
        let name = TableName::try_from_str("users").unwrap();
        assert_eq!(name.as_str(), "users");
    }

    #[test]
    fn table_name_rejects_empty() {
        assert!(matches!(
            TableName::try_from_str(""),
            Err(TableNameError::Empty)
        ));
    }

    #[test]
    fn table_name_rejects_leading_digit() {
        assert!(matches!(
            TableName::try_from_str("1users"),
            Err(TableNameError::InvalidLeadingChar { .. })
        ));
    }

    #[test]
    fn table_name_rejects_len_over_max() {
        let s = "a".repeat(MAX_TABLE_NAME_LEN + 1);
        assert!(matches!(
            TableName::try_from_str(&s),
            Err(TableNameError::TooLong { .. })
        ));
    }

    #[test]
    fn table_name_rejects_punctuation() {
        assert!(matches!(
            TableName::try_from_str("us ers"),
            Err(TableNameError::InvalidChar { ch: ' ', .. })
        ));
    }

    #[test]
    fn derived_index_name_joins_fields() {
        let fields = [
            FieldPath::try_from_str("tenant_id").unwrap(),
            FieldPath::try_from_str("slug").unwrap(),
        ];
        assert_eq!(IndexName::derived(&fields).as_str(), "by_tenant_id_slug");
    }

    #[test]
    fn derived_index_name_flattens_nested_paths() {
        let fields = [FieldPath::try_from_str("address.city").unwrap()];
        assert_eq!(IndexName::derived(&fields).as_str(), "by_address_city");
    }

    #[test]
    fn sanitized_replaces_illegal_chars() {
        let name = IndexName::sanitized("My Index!!");
        assert_eq!(name.as_str(), "My_Index__");
        assert!(is_legal_index_name(name.as_str()));
    }

    #[test]
    fn sanitized_forces_leading_letter() {
        let name = IndexName::sanitized("1st_place");
        assert!(is_legal_index_name(name.as_str()));
        assert!(name.as_str().starts_with("idx_"));
    }

    #[test]
    fn sanitized_clamps_length() {
        let name = IndexName::sanitized(&"a".repeat(200));
        assert_eq!(name.as_str().len(), MAX_INDEX_NAME_LEN);
    }

    #[test]
    fn field_path_rejects_excess_depth() {
        assert!(matches!(
            FieldPath::try_from_str("a.b.c.d.e"),
            Err(FieldPathError::TooDeep { .. })
        ));
        assert!(FieldPath::try_from_str("a.b.c.d").is_ok());
    }

    #[test]
    fn field_path_rejects_empty_segment() {
        assert!(matches!(
            FieldPath::try_from_str("a..b"),
            Err(FieldPathError::EmptySegment { .. })
        ));
    }

    #[test]
    fn field_path_root_and_nesting() {
        let path = FieldPath::try_from_str("address.city").unwrap();
        assert_eq!(path.root(), "address");
        assert!(path.is_nested());

        let flat = FieldPath::try_from_str("email").unwrap();
        assert_eq!(flat.root(), "email");
        assert!(!flat.is_nested());
    }

    #[test]
    fn system_field_detection() {
        assert!(is_system_field("_id"));
        assert!(!is_system_field("id"));
    }

    proptest! {
        // Sanitation is total: any input yields a legal index name.
        #[test]
        fn sanitized_always_legal(raw in "\\PC{0,120}") {
            let name = IndexName::sanitized(&raw);
            prop_assert!(is_legal_index_name(name.as_str()), "illegal: {:?}", name.as_str());
        }

        #[test]
        fn derived_always_legal(fields in proptest::collection::vec("[a-z_][a-z0-9_]{0,20}", 1..4)) {
            let paths: Vec<FieldPath> = fields
                .iter()
                .map(|f| FieldPath::try_from_str(f).unwrap())
                .collect();
            let name = IndexName::derived(&paths);
            prop_assert!(is_legal_index_name(name.as_str()));
        }
    }
}
