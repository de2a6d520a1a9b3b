//! Dynamic document values.
//!
//! Invariants:
//! - `Document` field names are application-level; names starting with `_`
//!   are reserved for the hosting store and never carry defaults.
//! - Canonical index keys are stable across runs: equal values always encode
//!   to equal keys, distinct types never collide (type-tag prefix).

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};
use ulid::Ulid;

///
/// DocumentId
///
/// Opaque row identity assigned by the store. The owning table is resolved
/// via registry/store lookup, never by parsing the id text.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DocumentId(Ulid);

impl DocumentId {
    /// Mint a fresh id (store-side use).
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn try_from_str(s: &str) -> Result<Self, ulid::DecodeError> {
        Ulid::from_string(s).map(Self)
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for DocumentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ulid::from_string(&s)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

///
/// Value
///
/// Runtime value stored in a document field. This is a deliberately small
/// surface: the host store owns the physical representation, this layer only
/// needs equality, canonical key encoding, and a type label for diagnostics.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(i64),
    Ref(DocumentId),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type label used in validation diagnostics.
    #[must_use]
    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Ref(_) => "ref",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Encode one canonical index-key component.
    ///
    /// Equality-preserving and type-tagged; the memory store keys its
    /// physical indexes with these so distinct types never collide.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        match self {
            Self::Null => "n:".to_string(),
            Self::Bool(b) => format!("b:{}", u8::from(*b)),
            Self::Int(v) => format!("i:{v}"),
            // Bit pattern keeps -0.0 / 0.0 and NaN payloads distinct but stable.
            Self::Float(v) => format!("f:{:016x}", v.to_bits()),
            Self::Text(s) => format!("t:{s}"),
            Self::Timestamp(v) => format!("s:{v}"),
            Self::Ref(id) => format!("r:{id}"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Self::canonical_key).collect();
                format!("l:[{}]", parts.join(","))
            }
            Self::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.canonical_key()))
                    .collect();
                format!("m:{{{}}}", parts.join(","))
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Timestamp(v) => write!(f, "ts({v})"),
            Self::Ref(id) => write!(f, "ref({id})"),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Map(entries) => {
                let parts: Vec<String> = entries.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self {
        Self::Ref(id)
    }
}

///
/// Document
///
/// Ordered field map. Never cached across pipeline runs; every stage that
/// needs current state re-reads through the store.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter, used heavily in tests and fixtures.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn put(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Resolve a dotted path through nested maps.
    #[must_use]
    pub fn get_path(&self, path: &crate::identity::FieldPath) -> Option<&Value> {
        let mut segments = path.segments();
        let root = segments.next()?;
        let mut current = self.0.get(root)?;

        for segment in segments {
            match current {
                Value::Map(entries) => current = entries.get(segment)?,
                _ => return None,
            }
        }

        Some(current)
    }

    /// Merge `other` on top of this document, returning the merged copy.
    #[must_use]
    pub fn merged_with(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (field, value) in &other.0 {
            out.0.insert(field.clone(), value.clone());
        }
        out
    }

    /// Fields whose value in `other` differs from this document.
    ///
    /// Drives patch narrowing: only these fields are validated and written.
    #[must_use]
    pub fn changed_fields(&self, other: &Self) -> std::collections::BTreeSet<String> {
        other
            .0
            .iter()
            .filter(|(field, value)| self.0.get(*field) != Some(value))
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// Restrict to the named fields (patch write sets).
    #[must_use]
    pub fn restricted_to(&self, fields: &std::collections::BTreeSet<String>) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(field, _)| fields.contains(*field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FieldPath;

    #[test]
    fn canonical_keys_distinguish_types() {
        let int = Value::Int(1).canonical_key();
        let boolean = Value::Bool(true).canonical_key();
        let text = Value::Text("1".into()).canonical_key();

        assert_ne!(int, boolean);
        assert_ne!(int, text);
        assert_ne!(boolean, text);
    }

    #[test]
    fn canonical_keys_are_equality_preserving() {
        let a = Value::Text("hello".into());
        let b = Value::Text("hello".into());
        assert_eq!(a.canonical_key(), b.canonical_key());

        let neg_zero = Value::Float(-0.0).canonical_key();
        let pos_zero = Value::Float(0.0).canonical_key();
        assert_ne!(neg_zero, pos_zero);
    }

    #[test]
    fn nested_path_resolution() {
        let doc = Document::new().set(
            "address",
            Value::Map(BTreeMap::from([(
                "city".to_string(),
                Value::Text("Oslo".into()),
            )])),
        );

        let path = FieldPath::try_from_str("address.city").unwrap();
        assert_eq!(doc.get_path(&path), Some(&Value::Text("Oslo".into())));

        let missing = FieldPath::try_from_str("address.zip").unwrap();
        assert_eq!(doc.get_path(&missing), None);
    }

    #[test]
    fn changed_fields_ignores_equal_values() {
        let stored = Document::new().set("name", "ada").set("age", 36i64);
        let incoming = Document::new().set("name", "ada").set("age", 37i64);

        let changed = stored.changed_fields(&incoming);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("age"));
    }

    #[test]
    fn changed_fields_empty_for_identical_payload() {
        let stored = Document::new().set("name", "ada").set("age", 36i64);
        let incoming = Document::new().set("age", 36i64);

        assert!(stored.changed_fields(&incoming).is_empty());
    }

    #[test]
    fn document_id_text_roundtrip() {
        let id = DocumentId::generate();
        let parsed = DocumentId::try_from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }
}
