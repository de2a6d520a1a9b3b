use crate::{
    db::{
        hooks::{AfterHook, BeforeHook},
        store::Datastore,
    },
    error::ValidationFailure,
    identity::{FieldPath, TableName, is_system_field},
    schema::{
        SchemaError,
        default::DefaultValue,
        field::FieldSpec,
        index::{IndexModel, SearchIndexModel, VectorIndexModel},
        relation::{OnDelete, RelationRule},
        unique::{OnConflict, UniqueRule},
    },
    value::Document,
};
use std::{fmt, sync::Arc};

///
/// ValidationCtx
/// Read-only context handed to function-valued validation rules.
///

pub struct ValidationCtx<'a> {
    pub table: &'a TableName,
    pub store: &'a dyn Datastore,
}

/// Function-valued validation rule. Runs post-merge against the full
/// candidate document, with database read access.
pub type ValidationFn =
    Arc<dyn Fn(&ValidationCtx<'_>, &Document) -> Result<(), ValidationFailure> + Send + Sync>;

///
/// ValidationRule
/// Explicit tagged variant; no runtime "is this a function or a schema"
/// probing.
///

#[derive(Clone, Default)]
pub enum ValidationRule {
    None,
    #[default]
    Schema,
    Function(ValidationFn),
}

impl ValidationRule {
    #[must_use]
    pub fn function(
        f: impl Fn(&ValidationCtx<'_>, &Document) -> Result<(), ValidationFailure>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::Function(Arc::new(f))
    }

    /// Stable label used in the schema export.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Schema => "schema",
            Self::Function(_) => "function",
        }
    }
}

impl fmt::Debug for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

///
/// TableModel
///
/// Immutable exported descriptor for one declared table. Produced only by
/// [`TableBuilder::build`]; every invariant below holds by construction:
/// - field names are unique and not system-reserved
/// - index names are unique within the table
/// - every composite unique rule has a backing composite index
/// - every relation field has a single-field index over itself
///

pub struct TableModel {
    name: TableName,
    fields: Vec<(String, FieldSpec)>,
    indexes: Vec<IndexModel>,
    search_indexes: Vec<SearchIndexModel>,
    vector_indexes: Vec<VectorIndexModel>,
    defaults: Vec<(String, DefaultValue)>,
    uniques: Vec<UniqueRule>,
    relations: Vec<RelationRule>,
    validation: ValidationRule,
    pub(crate) table_before: Vec<BeforeHook>,
    pub(crate) table_after: Vec<AfterHook>,
    pub(crate) field_before: Vec<(String, BeforeHook)>,
    pub(crate) field_after: Vec<(String, AfterHook)>,
}

impl TableModel {
    #[must_use]
    pub const fn name(&self) -> &TableName {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, s)| (n.as_str(), s))
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    #[must_use]
    pub fn indexes(&self) -> &[IndexModel] {
        &self.indexes
    }

    #[must_use]
    pub fn search_indexes(&self) -> &[SearchIndexModel] {
        &self.search_indexes
    }

    #[must_use]
    pub fn vector_indexes(&self) -> &[VectorIndexModel] {
        &self.vector_indexes
    }

    pub fn defaults(&self) -> impl Iterator<Item = (&str, &DefaultValue)> {
        self.defaults.iter().map(|(n, d)| (n.as_str(), d))
    }

    #[must_use]
    pub fn uniques(&self) -> &[UniqueRule] {
        &self.uniques
    }

    #[must_use]
    pub fn relations(&self) -> &[RelationRule] {
        &self.relations
    }

    #[must_use]
    pub const fn validation(&self) -> &ValidationRule {
        &self.validation
    }

    /// First declared index covering an equality lookup over `fields`.
    /// Declaration order is the tiebreak between multiple candidates.
    #[must_use]
    pub fn index_covering(&self, fields: &[FieldPath]) -> Option<&IndexModel> {
        self.indexes.iter().find(|index| index.covers(fields))
    }
}

impl fmt::Debug for TableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableModel")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("indexes", &self.indexes)
            .field("search_indexes", &self.search_indexes)
            .field("vector_indexes", &self.vector_indexes)
            .field("defaults", &self.defaults)
            .field("uniques", &self.uniques)
            .field("relations", &self.relations)
            .field("validation", &self.validation)
            .field("table_before", &self.table_before.len())
            .field("table_after", &self.table_after.len())
            .field("field_before", &self.field_before.len())
            .field("field_after", &self.field_after.len())
            .finish()
    }
}

///
/// TableBuilder
///
/// Staged builder: configuration methods consume and return the draft, and
/// nothing is validated until `build()` finalizes the immutable model. Raw
/// strings are accepted everywhere so a half-built draft can never observe a
/// partially-checked state.
///

#[must_use]
pub struct TableBuilder {
    name: String,
    fields: Vec<(String, FieldSpec)>,
    defaults: Vec<(String, DefaultValue)>,
    uniques: Vec<(Vec<String>, OnConflict)>,
    relations: Vec<(String, String, OnDelete)>,
    indexes: Vec<(Option<String>, Vec<String>)>,
    search_indexes: Vec<(String, String, Vec<String>)>,
    vector_indexes: Vec<(String, String, u32, Vec<String>)>,
    validation: ValidationRule,
    table_before: Vec<BeforeHook>,
    table_after: Vec<AfterHook>,
    field_before: Vec<(String, BeforeHook)>,
    field_after: Vec<(String, AfterHook)>,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            defaults: Vec::new(),
            uniques: Vec::new(),
            relations: Vec::new(),
            indexes: Vec::new(),
            search_indexes: Vec::new(),
            vector_indexes: Vec::new(),
            validation: ValidationRule::default(),
            table_before: Vec::new(),
            table_after: Vec::new(),
            field_before: Vec::new(),
            field_after: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.push((name.to_string(), spec));
        self
    }

    pub fn default_value(mut self, field: &str, default: impl Into<DefaultValue>) -> Self {
        self.defaults.push((field.to_string(), default.into()));
        self
    }

    pub fn unique(self, field: &str, on_conflict: OnConflict) -> Self {
        self.unique_together(&[field], on_conflict)
    }

    pub fn unique_together(mut self, fields: &[&str], on_conflict: OnConflict) -> Self {
        self.uniques.push((
            fields.iter().map(|f| (*f).to_string()).collect(),
            on_conflict,
        ));
        self
    }

    pub fn relation(mut self, field: &str, target: &str, on_delete: OnDelete) -> Self {
        self.relations
            .push((field.to_string(), target.to_string(), on_delete));
        self
    }

    pub fn index(mut self, fields: &[&str]) -> Self {
        self.indexes
            .push((None, fields.iter().map(|f| (*f).to_string()).collect()));
        self
    }

    pub fn named_index(mut self, name: &str, fields: &[&str]) -> Self {
        self.indexes.push((
            Some(name.to_string()),
            fields.iter().map(|f| (*f).to_string()).collect(),
        ));
        self
    }

    pub fn search_index(mut self, name: &str, search_field: &str, filter_fields: &[&str]) -> Self {
        self.search_indexes.push((
            name.to_string(),
            search_field.to_string(),
            filter_fields.iter().map(|f| (*f).to_string()).collect(),
        ));
        self
    }

    pub fn vector_index(
        mut self,
        name: &str,
        vector_field: &str,
        dimensions: u32,
        filter_fields: &[&str],
    ) -> Self {
        self.vector_indexes.push((
            name.to_string(),
            vector_field.to_string(),
            dimensions,
            filter_fields.iter().map(|f| (*f).to_string()).collect(),
        ));
        self
    }

    pub fn validation(mut self, rule: ValidationRule) -> Self {
        self.validation = rule;
        self
    }

    pub fn before_hook(
        mut self,
        hook: impl Fn(&crate::db::hooks::HookCtx<'_>, Document) -> Result<Document, crate::error::GateError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.table_before.push(Arc::new(hook));
        self
    }

    pub fn after_hook(
        mut self,
        hook: impl Fn(&crate::db::hooks::HookCtx<'_>, &Document) + Send + Sync + 'static,
    ) -> Self {
        self.table_after.push(Arc::new(hook));
        self
    }

    pub fn field_before_hook(
        mut self,
        field: &str,
        hook: impl Fn(&crate::db::hooks::HookCtx<'_>, Document) -> Result<Document, crate::error::GateError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.field_before.push((field.to_string(), Arc::new(hook)));
        self
    }

    pub fn field_after_hook(
        mut self,
        field: &str,
        hook: impl Fn(&crate::db::hooks::HookCtx<'_>, &Document) + Send + Sync + 'static,
    ) -> Self {
        self.field_after.push((field.to_string(), Arc::new(hook)));
        self
    }

    /// Finalize the draft into an immutable model, checking every invariant.
    pub fn build(self) -> Result<TableModel, SchemaError> {
        let name = TableName::try_from_str(&self.name)?;

        // Field names: unique, not system-reserved.
        for (i, (field, _)) in self.fields.iter().enumerate() {
            if is_system_field(field) {
                return Err(SchemaError::SystemField {
                    table: name.clone(),
                    field: field.clone(),
                });
            }
            if self.fields[..i].iter().any(|(other, _)| other == field) {
                return Err(SchemaError::DuplicateField {
                    table: name.clone(),
                    field: field.clone(),
                });
            }
        }

        let known = |field: &str| self.fields.iter().any(|(n, _)| n == field);
        let require_path = |raw: &str, context: &'static str| -> Result<FieldPath, SchemaError> {
            let path = FieldPath::try_from_str(raw)?;
            if known(path.root()) {
                Ok(path)
            } else {
                Err(SchemaError::UnknownField {
                    table: name.clone(),
                    field: raw.to_string(),
                    context,
                })
            }
        };

        // Defaults: declared field, never system-reserved.
        for (field, _) in &self.defaults {
            if is_system_field(field) {
                return Err(SchemaError::SystemField {
                    table: name.clone(),
                    field: field.clone(),
                });
            }
            if !known(field) {
                return Err(SchemaError::UnknownField {
                    table: name.clone(),
                    field: field.clone(),
                    context: "default",
                });
            }
        }

        // Declared indexes, in declaration order.
        let mut indexes = Vec::new();
        for (raw_name, raw_fields) in &self.indexes {
            let fields = raw_fields
                .iter()
                .map(|f| require_path(f, "index"))
                .collect::<Result<Vec<_>, _>>()?;
            let index = match raw_name {
                Some(n) => IndexModel::named(n, fields),
                None => IndexModel::over(fields),
            };
            indexes.push(index);
        }

        // Relations: ref-typed field (or nested path into a map field), plus
        // an automatic single-field index over the referencing field.
        let mut relations = Vec::new();
        for (raw_field, raw_target, on_delete) in &self.relations {
            let field = require_path(raw_field, "relation")?;
            let target = TableName::try_from_str(raw_target)?;

            let Some(spec) = self
                .fields
                .iter()
                .find(|(n, _)| n == field.root())
                .map(|(_, s)| s)
            else {
                return Err(SchemaError::UnknownField {
                    table: name.clone(),
                    field: raw_field.clone(),
                    context: "relation",
                });
            };

            if field.is_nested() {
                if !matches!(spec.kind, crate::schema::field::FieldKind::Map) {
                    return Err(SchemaError::RelationFieldNotRef {
                        table: name.clone(),
                        field: field.as_str().to_string(),
                    });
                }
            } else {
                if !spec.kind.is_ref() {
                    return Err(SchemaError::RelationFieldNotRef {
                        table: name.clone(),
                        field: field.as_str().to_string(),
                    });
                }
                // Nulling a top-level required field would fail re-validation.
                if *on_delete == OnDelete::SetOptional && !spec.optional {
                    return Err(SchemaError::SetOptionalRequiresOptionalField {
                        table: name.clone(),
                        field: field.as_str().to_string(),
                    });
                }
            }

            let auto = IndexModel::over(vec![field.clone()]);
            if !indexes.iter().any(|i| i.name == auto.name) {
                indexes.push(auto);
            }

            relations.push(RelationRule {
                field,
                target,
                on_delete: *on_delete,
            });
        }

        // Unique rules. Single-field rules get an automatic `by_<field>`
        // index; composite rules reuse the first declared covering index or
        // get an automatic composite index in rule-field order.
        let mut uniques = Vec::new();
        for (raw_fields, on_conflict) in &self.uniques {
            if raw_fields.is_empty() {
                return Err(SchemaError::UniqueRuleWithoutFields {
                    table: name.clone(),
                });
            }
            let fields = raw_fields
                .iter()
                .map(|f| require_path(f, "unique"))
                .collect::<Result<Vec<_>, _>>()?;

            if !indexes.iter().any(|index| index.covers(&fields)) {
                indexes.push(IndexModel::over(fields.clone()));
            }

            uniques.push(UniqueRule::new(fields, *on_conflict));
        }

        // Index names unique within the table (plain, search, and vector
        // share one namespace).
        let mut search_indexes = Vec::new();
        for (raw_name, raw_search, raw_filters) in &self.search_indexes {
            search_indexes.push(SearchIndexModel {
                name: crate::identity::IndexName::sanitized(raw_name),
                search_field: require_path(raw_search, "search index")?,
                filter_fields: raw_filters
                    .iter()
                    .map(|f| require_path(f, "search index"))
                    .collect::<Result<Vec<_>, _>>()?,
            });
        }
        let mut vector_indexes = Vec::new();
        for (raw_name, raw_vector, dimensions, raw_filters) in &self.vector_indexes {
            vector_indexes.push(VectorIndexModel {
                name: crate::identity::IndexName::sanitized(raw_name),
                vector_field: require_path(raw_vector, "vector index")?,
                dimensions: *dimensions,
                filter_fields: raw_filters
                    .iter()
                    .map(|f| require_path(f, "vector index"))
                    .collect::<Result<Vec<_>, _>>()?,
            });
        }

        let mut seen = std::collections::BTreeSet::new();
        for index_name in indexes
            .iter()
            .map(|i| &i.name)
            .chain(search_indexes.iter().map(|i| &i.name))
            .chain(vector_indexes.iter().map(|i| &i.name))
        {
            if !seen.insert(index_name.clone()) {
                return Err(SchemaError::DuplicateIndexName {
                    table: name.clone(),
                    index: index_name.clone(),
                });
            }
        }

        // Field hooks must point at declared fields.
        for field in self
            .field_before
            .iter()
            .map(|(f, _)| f)
            .chain(self.field_after.iter().map(|(f, _)| f))
        {
            if !known(field) {
                return Err(SchemaError::UnknownField {
                    table: name.clone(),
                    field: field.clone(),
                    context: "field hook",
                });
            }
        }

        Ok(TableModel {
            name,
            fields: self.fields,
            indexes,
            search_indexes,
            vector_indexes,
            defaults: self.defaults,
            uniques,
            relations,
            validation: self.validation,
            table_before: self.table_before,
            table_after: self.table_after,
            field_before: self.field_before,
            field_after: self.field_after,
        })
    }
}

///
/// TESTS
///
