//! Entity schema declarations consumed by repositories and collections.
//!
//! # Responsibility
//! - Declare per-entity columns, identifier strategy and relationships.
//! - Tell repositories which columns are stored (native) and which are
//!   computed by the application.
//!
//! # Invariants
//! - Entity, table, column and relationship names match
//!   `^[A-Za-z_][A-Za-z0-9_]*$`, so they are safe to quote into SQL.
//! - Computed columns never have storage.
//! - The identifier column is always native and sortable.

use crate::config::ConfigError;
use crate::model::record::Record;
use crate::model::value::{FieldValues, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

static SCHEMA_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid schema name regex"));

/// Returns whether `value` is usable as an entity/table/column name.
pub fn is_valid_name(value: &str) -> bool {
    SCHEMA_NAME_RE.is_match(value)
}

/// How a record identifier is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// Integer assigned by storage on first persist.
    AutoIncrement,
    /// Random v4 uuid text generated on first persist when unset.
    Uuid,
    /// Assigned by the caller before the first persist.
    External,
}

/// Value type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Boolean,
}

impl ColumnKind {
    /// Transforms an incoming value into model data for this column.
    pub fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (Self::Boolean, Value::Int(number)) => Value::Bool(number != 0),
            (Self::Boolean, Value::Float(number)) => Value::Bool(number != 0.0),
            (Self::Boolean, Value::Text(text)) => {
                Value::Bool(!(text.is_empty() || text == "0" || text == "false"))
            }
            (Self::Integer, Value::Bool(flag)) => Value::Int(i64::from(flag)),
            (Self::Integer, Value::Float(number)) if number.fract() == 0.0 => {
                Value::Int(number as i64)
            }
            (Self::Real, Value::Int(number)) => Value::Float(number as f64),
            (_, other) => other,
        }
    }
}

/// Application-side computation for a derived column.
pub type ComputeFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Where a column's value comes from.
#[derive(Clone)]
pub enum Storage {
    Native,
    Computed(ComputeFn),
}

impl Debug for Storage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "Native"),
            Self::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// One declared column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub storage: Storage,
    /// Value assigned to freshly created records.
    pub default: Value,
    /// Included in `Record::export_public_data`.
    pub public: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            storage: Storage::Native,
            default: Value::Null,
            public: false,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Real)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Boolean)
    }

    /// Declares a column the backend cannot store, filter or order by.
    pub fn computed(
        name: impl Into<String>,
        kind: ColumnKind,
        compute: impl Fn(&Record) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            storage: Storage::Computed(Arc::new(compute)),
            ..Self::new(name, kind)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = self.kind.coerce(value.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn is_native(&self) -> bool {
        matches!(self.storage, Storage::Native)
    }
}

/// Identifier column declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierDef {
    pub name: String,
    pub kind: IdentifierKind,
    pub public: bool,
}

/// Relationship cardinality seen from the declaring entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Relationship descriptor used by typed navigation.
///
/// Navigation matches `local_column` on the declaring record against
/// `remote_column` on the target entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub local_column: String,
    pub remote_column: String,
    pub cardinality: Cardinality,
}

impl Relationship {
    pub fn one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
            cardinality: Cardinality::One,
        }
    }

    pub fn many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(name, target, local_column, remote_column)
        }
    }
}

/// Complete declaration of one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub table: String,
    pub identifier: IdentifierDef,
    columns: Vec<ColumnDef>,
    relationships: Vec<Relationship>,
    label_columns: Vec<String>,
}

impl EntitySchema {
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            name: name.into(),
            table: table.into(),
            identifier: IdentifierDef {
                name: "id".to_string(),
                kind: IdentifierKind::AutoIncrement,
                public: true,
            },
            columns: Vec::new(),
            relationships: Vec::new(),
            label_columns: Vec::new(),
        }
    }

    pub fn identifier_column(&self) -> &str {
        &self.identifier.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn native_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|column| column.is_native())
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Whether `name` is the identifier or a declared column.
    pub fn has_column(&self, name: &str) -> bool {
        name == self.identifier.name || self.column(name).is_some()
    }

    /// Whether `name` is the identifier or a stored (non-computed) column.
    pub fn is_native_column(&self, name: &str) -> bool {
        name == self.identifier.name || self.column(name).is_some_and(ColumnDef::is_native)
    }

    /// First key of `values` a bulk write cannot target: the identifier, a
    /// computed column or an undeclared name.
    pub fn unwritable_column<'a>(&self, values: &'a FieldValues) -> Option<&'a str> {
        values
            .keys()
            .map(String::as_str)
            .find(|name| !self.column(name).is_some_and(ColumnDef::is_native))
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|relation| relation.name == name)
    }

    pub fn label_columns(&self) -> &[String] {
        &self.label_columns
    }
}

/// Builder for `EntitySchema`; validates names on `build`.
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    name: String,
    table: String,
    identifier: IdentifierDef,
    columns: Vec<ColumnDef>,
    relationships: Vec<Relationship>,
    label_columns: Vec<String>,
}

impl EntitySchemaBuilder {
    pub fn identifier(mut self, name: impl Into<String>, kind: IdentifierKind) -> Self {
        self.identifier.name = name.into();
        self.identifier.kind = kind;
        self
    }

    pub fn private_identifier(mut self) -> Self {
        self.identifier.public = false;
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn label<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<EntitySchema, ConfigError> {
        let names = [&self.name, &self.table, &self.identifier.name]
            .into_iter()
            .chain(self.columns.iter().map(|column| &column.name))
            .chain(self.relationships.iter().map(|relation| &relation.name));
        for name in names {
            if !is_valid_name(name) {
                return Err(ConfigError::InvalidName(name.clone()));
            }
        }

        Ok(EntitySchema {
            name: self.name,
            table: self.table,
            identifier: self.identifier,
            columns: self.columns,
            relationships: self.relationships,
            label_columns: self.label_columns,
        })
    }
}

/// Lookup of entity schemas by entity name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: EntitySchema) -> Result<Arc<EntitySchema>, ConfigError> {
        if self.entities.contains_key(schema.name.as_str()) {
            return Err(ConfigError::DuplicateEntity(schema.name));
        }
        let schema = Arc::new(schema);
        self.entities.insert(schema.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }

    pub fn get(&self, entity: &str) -> Result<Arc<EntitySchema>, ConfigError> {
        self.entities
            .get(entity)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEntity(entity.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, ColumnKind, EntitySchema, IdentifierKind, SchemaRegistry};
    use crate::config::ConfigError;
    use crate::model::value::{FieldValues, Value};

    #[test]
    fn bulk_writes_only_target_stored_columns() {
        let schema = EntitySchema::builder("Company", "tblCompany")
            .identifier("CompanyID", IdentifierKind::AutoIncrement)
            .column(ColumnDef::integer("Balance"))
            .column(ColumnDef::computed("Doubled", ColumnKind::Integer, |record| {
                record.get("Balance")
            }))
            .build()
            .expect("valid schema");

        let mut values = FieldValues::new();
        values.insert("Balance".to_string(), Value::Int(1));
        assert_eq!(schema.unwritable_column(&values), None);
        for column in ["CompanyID", "Doubled", "Nickname"] {
            let mut values = values.clone();
            values.insert(column.to_string(), Value::Int(2));
            assert_eq!(schema.unwritable_column(&values), Some(column));
        }
    }

    fn category() -> EntitySchema {
        EntitySchema::builder("Category", "tblCategory")
            .identifier("CategoryID", IdentifierKind::AutoIncrement)
            .column(ColumnDef::text("CategoryName"))
            .build()
            .expect("valid schema")
    }

    #[test]
    fn rejects_unsafe_names() {
        let err = EntitySchema::builder("Category", "tbl; DROP TABLE x")
            .build()
            .expect_err("table name with punctuation must fail");
        assert_eq!(err, ConfigError::InvalidName("tbl; DROP TABLE x".to_string()));
    }

    #[test]
    fn identifier_counts_as_native_column() {
        let schema = category();
        assert!(schema.has_column("CategoryID"));
        assert!(schema.is_native_column("CategoryID"));
        assert!(schema.is_native_column("CategoryName"));
        assert!(!schema.has_column("Missing"));
    }

    #[test]
    fn boolean_columns_coerce_integers() {
        assert_eq!(ColumnKind::Boolean.coerce(Value::Int(1)), Value::Bool(true));
        assert_eq!(ColumnKind::Boolean.coerce(Value::Int(0)), Value::Bool(false));
        assert_eq!(ColumnKind::Integer.coerce(Value::Bool(true)), Value::Int(1));
        assert_eq!(
            ColumnDef::boolean("Active").with_default(0).default,
            Value::Bool(false)
        );
    }

    #[test]
    fn registry_rejects_duplicates_and_unknown_entities() {
        let mut registry = SchemaRegistry::new();
        registry.register(category()).expect("first registration");
        let err = registry
            .register(category())
            .expect_err("duplicate registration must fail");
        assert_eq!(err, ConfigError::DuplicateEntity("Category".to_string()));
        assert_eq!(
            registry.get("Nope").expect_err("unknown entity"),
            ConfigError::UnknownEntity("Nope".to_string())
        );
    }
}
