use crate::identity::{FieldPath, IndexName};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

///
/// IndexModel
/// Descriptor for a plain secondary index. Field order is significant.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IndexModel {
    pub name: IndexName,
    pub fields: Vec<FieldPath>,
}

impl IndexModel {
    /// Build with the canonical derived name.
    #[must_use]
    pub fn over(fields: Vec<FieldPath>) -> Self {
        Self {
            name: IndexName::derived(&fields),
            fields,
        }
    }

    #[must_use]
    pub fn named(name: &str, fields: Vec<FieldPath>) -> Self {
        Self {
            name: IndexName::sanitized(name),
            fields,
        }
    }

    /// Whether this index can answer an equality lookup over `fields`:
    /// some leading prefix of the index covers every requested field.
    #[must_use]
    pub fn covers(&self, fields: &[FieldPath]) -> bool {
        if fields.len() > self.fields.len() {
            return false;
        }
        let prefix = &self.fields[..fields.len()];
        fields.iter().all(|f| prefix.contains(f))
    }
}

impl Display for IndexModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields.iter().map(FieldPath::as_str).collect();
        write!(f, "{}({})", self.name, fields.join(", "))
    }
}

///
/// SearchIndexModel
/// Full-text index descriptor; built by the host platform, not queried here.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SearchIndexModel {
    pub name: IndexName,
    pub search_field: FieldPath,
    pub filter_fields: Vec<FieldPath>,
}

///
/// VectorIndexModel
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VectorIndexModel {
    pub name: IndexName,
    pub vector_field: FieldPath,
    pub dimensions: u32,
    pub filter_fields: Vec<FieldPath>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> FieldPath {
        FieldPath::try_from_str(s).unwrap()
    }

    #[test]
    fn derived_name_for_plain_index() {
        let index = IndexModel::over(vec![path("tenant_id"), path("slug")]);
        assert_eq!(index.name.as_str(), "by_tenant_id_slug");
    }

    #[test]
    fn covers_is_prefix_and_order_insensitive_within_prefix() {
        let index = IndexModel::over(vec![path("a"), path("b"), path("c")]);

        assert!(index.covers(&[path("a")]));
        assert!(index.covers(&[path("b"), path("a")]));
        assert!(index.covers(&[path("a"), path("b"), path("c")]));
        assert!(!index.covers(&[path("a"), path("c")]));
        assert!(!index.covers(&[path("d")]));
    }

    #[test]
    fn named_index_is_sanitized() {
        let index = IndexModel::named("My Index!!", vec![path("a")]);
        assert_eq!(index.name.as_str(), "My_Index__");
    }
}
