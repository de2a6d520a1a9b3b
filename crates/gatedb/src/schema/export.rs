//! Schema export format consumed by the host platform to build physical
//! indexes. `state` carries defaults/uniques/relations/validate metadata for
//! runtime use; computed defaults export as a marker since closures have no
//! serial form.

use crate::schema::{
    default::DefaultValue,
    registry::SchemaRegistry,
    relation::OnDelete,
    table::TableModel,
    unique::OnConflict,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use std::collections::BTreeMap;

///
/// SchemaExport
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SchemaExport {
    pub tables: Vec<TableExport>,
    pub schema_validation: bool,
}

impl SchemaExport {
    #[must_use]
    pub fn from_registry(registry: &SchemaRegistry) -> Self {
        Self {
            tables: registry.tables().map(TableExport::from_model).collect(),
            schema_validation: registry.schema_validation(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

///
/// TableExport
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TableExport {
    pub table_name: String,
    pub indexes: Vec<IndexExport>,
    pub search_indexes: Vec<SearchIndexExport>,
    pub vector_indexes: Vec<VectorIndexExport>,
    /// Serialized field-validator tree.
    pub document_type: serde_json::Value,
    pub state: TableStateExport,
}

impl TableExport {
    #[must_use]
    pub fn from_model(model: &TableModel) -> Self {
        let mut document_type = Map::new();
        for (field, spec) in model.fields() {
            let mut node = Map::new();
            node.insert("kind".to_string(), json!(spec.kind.label()));
            if let crate::schema::field::FieldKind::Ref(target) = &spec.kind {
                node.insert("target".to_string(), json!(target.as_str()));
            }
            node.insert("optional".to_string(), json!(spec.optional));
            document_type.insert(field.to_string(), serde_json::Value::Object(node));
        }

        Self {
            table_name: model.name().as_str().to_string(),
            indexes: model
                .indexes()
                .iter()
                .map(|index| IndexExport {
                    index_name: index.name.as_str().to_string(),
                    fields: index.fields.iter().map(|f| f.as_str().to_string()).collect(),
                })
                .collect(),
            search_indexes: model
                .search_indexes()
                .iter()
                .map(|index| SearchIndexExport {
                    index_name: index.name.as_str().to_string(),
                    search_field: index.search_field.as_str().to_string(),
                    filter_fields: index
                        .filter_fields
                        .iter()
                        .map(|f| f.as_str().to_string())
                        .collect(),
                })
                .collect(),
            vector_indexes: model
                .vector_indexes()
                .iter()
                .map(|index| VectorIndexExport {
                    index_name: index.name.as_str().to_string(),
                    vector_field: index.vector_field.as_str().to_string(),
                    dimensions: index.dimensions,
                    filter_fields: index
                        .filter_fields
                        .iter()
                        .map(|f| f.as_str().to_string())
                        .collect(),
                })
                .collect(),
            document_type: serde_json::Value::Object(document_type),
            state: TableStateExport::from_model(model),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IndexExport {
    pub index_name: String,
    pub fields: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SearchIndexExport {
    pub index_name: String,
    pub search_field: String,
    pub filter_fields: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VectorIndexExport {
    pub index_name: String,
    pub vector_field: String,
    pub dimensions: u32,
    pub filter_fields: Vec<String>,
}

///
/// TableStateExport
/// Runtime metadata carried verbatim alongside the index declarations.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TableStateExport {
    pub defaults: BTreeMap<String, DefaultExport>,
    pub uniques: Vec<UniqueExport>,
    pub relations: Vec<RelationExport>,
    pub validate: String,
}

impl TableStateExport {
    #[must_use]
    pub fn from_model(model: &TableModel) -> Self {
        Self {
            defaults: model
                .defaults()
                .map(|(field, default)| {
                    let exported = match default {
                        DefaultValue::Static(value) => DefaultExport::Static(value.clone()),
                        DefaultValue::Computed(_) => DefaultExport::Computed,
                    };
                    (field.to_string(), exported)
                })
                .collect(),
            uniques: model
                .uniques()
                .iter()
                .map(|rule| UniqueExport {
                    name: rule.name.clone(),
                    fields: rule.fields.iter().map(|f| f.as_str().to_string()).collect(),
                    on_conflict: rule.on_conflict,
                })
                .collect(),
            relations: model
                .relations()
                .iter()
                .map(|rule| RelationExport {
                    field: rule.field.as_str().to_string(),
                    target_table: rule.target.as_str().to_string(),
                    on_delete: rule.on_delete,
                })
                .collect(),
            validate: model.validation().label().to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultExport {
    Static(crate::value::Value),
    Computed,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UniqueExport {
    pub name: String,
    pub fields: Vec<String>,
    pub on_conflict: OnConflict,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RelationExport {
    pub field: String,
    pub target_table: String,
    pub on_delete: OnDelete,
}

///
/// TESTS
///
