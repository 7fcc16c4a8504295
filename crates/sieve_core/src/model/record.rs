//! Record (model instance) state.
//!
//! # Responsibility
//! - Hold field values, identifier and lifecycle flags for one entity row.
//! - Track which fields changed since the last load or persist.
//!
//! # Invariants
//! - `is_loaded()` is true only after hydration from storage; importing data
//!   never marks a record loaded.
//! - A record with `is_new() == true` has not been confirmed by storage; its
//!   identifier may be unset (or caller-assigned for external identifiers).
//! - Persisting clears the new-record flag and the dirty-field set.

use crate::events::EventKind;
use crate::model::value::{FieldValues, RecordId, Value};
use crate::query::filter::FieldSource;
use crate::schema::{EntitySchema, Storage};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Mutable state of one entity instance.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<EntitySchema>,
    id: Option<RecordId>,
    values: FieldValues,
    dirty: BTreeSet<String>,
    loaded: bool,
    new_record: bool,
    pending_after_save: Vec<(EventKind, Vec<Value>)>,
}

impl Record {
    /// Creates an unsaved record populated with column defaults.
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        let values = schema
            .native_columns()
            .map(|column| (column.name.clone(), column.default.clone()))
            .collect();
        Self {
            schema,
            id: None,
            values,
            dirty: BTreeSet::new(),
            loaded: false,
            new_record: true,
            pending_after_save: Vec::new(),
        }
    }

    /// Builds a record from hydrated storage data.
    pub(crate) fn from_storage(schema: Arc<EntitySchema>, id: RecordId, stored: FieldValues) -> Self {
        let mut record = Self::new(schema);
        record.id = Some(id);
        record.replace_stored(stored);
        record.new_record = false;
        record
    }

    pub fn entity(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn id(&self) -> Option<&RecordId> {
        self.id.as_ref()
    }

    pub fn is_new(&self) -> bool {
        self.new_record
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// True when the identifier of a persisted record was overwritten.
    pub fn identifier_changed(&self) -> bool {
        !self.new_record && self.dirty.contains(self.schema.identifier_column())
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Reads a field, evaluating computed columns on demand.
    ///
    /// Unknown fields read as `Value::Null`.
    pub fn get(&self, column: &str) -> Value {
        if column == self.schema.identifier_column() {
            return self.id.clone().map(Value::from).unwrap_or_default();
        }
        if let Some(definition) = self.schema.column(column) {
            if let Storage::Computed(compute) = &definition.storage {
                return compute(self);
            }
        }
        self.values.get(column).cloned().unwrap_or_default()
    }

    /// Writes a field and marks it dirty when the value changes.
    ///
    /// Writing the identifier column of a new record sets its identifier. A
    /// persisted record keeps its identifier; a different value is only
    /// tracked as a change, and `Session::save` rejects it.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        let value = value.into();
        if column == self.schema.identifier_column() {
            let id = RecordId::from_value(&value);
            if self.new_record {
                self.id = id;
            } else if id == self.id {
                self.dirty.remove(column);
            } else {
                self.dirty.insert(column.to_string());
            }
            return;
        }

        let value = match self.schema.column(column) {
            Some(definition) => definition.kind.coerce(value),
            None => value,
        };
        if self.values.get(column) == Some(&value) {
            return;
        }
        self.values.insert(column.to_string(), value);
        self.dirty.insert(column.to_string());
    }

    /// Bulk-assigns fields without touching the loaded/new-record flags.
    pub fn import_data(&mut self, data: FieldValues) {
        for (column, value) in data {
            self.set(&column, value);
        }
    }

    /// Human-readable label built from the schema's label columns.
    pub fn label(&self) -> String {
        self.schema
            .label_columns()
            .iter()
            .map(|column| self.get(column))
            .filter(|value| !value.is_null())
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Exports only columns declared public (plus a public identifier).
    pub fn export_public_data(&self) -> FieldValues {
        let mut data = FieldValues::new();
        if self.schema.identifier.public {
            data.insert(self.schema.identifier.name.clone(), self.get(self.schema.identifier_column()));
        }
        for column in self.schema.columns().iter().filter(|column| column.public) {
            data.insert(column.name.clone(), self.get(&column.name));
        }
        data
    }

    /// Copies field values into a new, unsaved record without an identifier.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(Arc::clone(&self.schema));
        copy.import_data(self.values.clone());
        copy
    }

    /// Stored (non-computed) column values for persistence.
    pub fn native_values(&self) -> FieldValues {
        self.schema
            .native_columns()
            .map(|column| (column.name.clone(), self.get(&column.name)))
            .collect()
    }

    /// Dirty stored column values for partial updates.
    pub fn changed_native_values(&self) -> FieldValues {
        self.dirty
            .iter()
            .filter(|column| {
                column.as_str() != self.schema.identifier_column()
                    && self.schema.is_native_column(column)
            })
            .map(|column| (column.clone(), self.get(column)))
            .collect()
    }

    pub(crate) fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    pub(crate) fn mark_persisted(&mut self, id: RecordId) {
        self.id = Some(id);
        self.new_record = false;
        self.dirty.clear();
    }

    /// Replaces field values with freshly hydrated storage data.
    pub(crate) fn replace_stored(&mut self, stored: FieldValues) {
        let identifier = self.schema.identifier_column().to_string();
        for (column, value) in stored {
            if column == identifier {
                continue;
            }
            let value = match self.schema.column(&column) {
                Some(definition) => definition.kind.coerce(value),
                None => value,
            };
            self.values.insert(column, value);
        }
        self.dirty.clear();
        self.loaded = true;
    }

    /// Applies values written directly by storage (batch updates) in place.
    pub(crate) fn apply_stored(&mut self, stored: &FieldValues) {
        for (column, value) in stored {
            let value = match self.schema.column(column) {
                Some(definition) => definition.kind.coerce(value.clone()),
                None => value.clone(),
            };
            self.values.insert(column.clone(), value);
            self.dirty.remove(column);
        }
    }

    pub(crate) fn defer_after_save(&mut self, kind: EventKind, payload: Vec<Value>) {
        self.pending_after_save.push((kind, payload));
    }

    pub(crate) fn take_after_save(&mut self) -> Vec<(EventKind, Vec<Value>)> {
        std::mem::take(&mut self.pending_after_save)
    }
}

impl FieldSource for Record {
    fn field(&self, column: &str) -> Value {
        self.get(column)
    }
}

#[cfg(test)]
mod tests {
    use super::Record;
    use crate::model::value::{FieldValues, RecordId, Value};
    use crate::schema::{ColumnDef, ColumnKind, EntitySchema, IdentifierKind};
    use std::sync::Arc;

    fn company() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::builder("Company", "tblCompany")
                .identifier("CompanyID", IdentifierKind::AutoIncrement)
                .column(ColumnDef::text("CompanyName").public())
                .column(ColumnDef::boolean("Active").with_default(false))
                .column(ColumnDef::integer("Balance").with_default(0))
                .column(ColumnDef::computed(
                    "CompanyIDSquared",
                    ColumnKind::Integer,
                    |record| match record.get("CompanyID").as_i64() {
                        Some(id) => Value::Int(id * id),
                        None => Value::Null,
                    },
                ))
                .label(["CompanyName"])
                .build()
                .expect("valid schema"),
        )
    }

    #[test]
    fn new_record_has_defaults_and_flags() {
        let record = Record::new(company());
        assert!(record.is_new());
        assert!(!record.is_loaded());
        assert!(!record.has_changes());
        assert_eq!(record.get("Balance"), Value::Int(0));
        assert_eq!(record.get("Active"), Value::Bool(false));
        assert_eq!(record.get("CompanyID"), Value::Null);
    }

    #[test]
    fn set_marks_dirty_only_on_change() {
        let mut record = Record::new(company());
        record.set("Balance", 0);
        assert!(!record.has_changes());
        record.set("Balance", 5);
        assert_eq!(record.dirty_fields().collect::<Vec<_>>(), vec!["Balance"]);
    }

    #[test]
    fn import_does_not_mark_loaded_or_persisted() {
        let mut record = Record::new(company());
        let mut data = FieldValues::new();
        data.insert("CompanyName".to_string(), Value::from("GCD"));
        data.insert("CompanyID".to_string(), Value::Int(2));
        record.import_data(data);

        assert!(!record.is_loaded());
        assert!(record.is_new());
        assert_eq!(record.id(), Some(&RecordId::Int(2)));
        assert_eq!(record.label(), "GCD");
    }

    #[test]
    fn computed_columns_read_from_the_record() {
        let mut record = Record::new(company());
        assert_eq!(record.get("CompanyIDSquared"), Value::Null);
        record.set("CompanyID", 3);
        assert_eq!(record.get("CompanyIDSquared"), Value::Int(9));
        assert!(!record.native_values().contains_key("CompanyIDSquared"));
    }

    #[test]
    fn export_public_data_skips_private_columns() {
        let mut record = Record::new(company());
        record.set("CompanyID", 3);
        record.set("CompanyName", "abc");
        record.set("Balance", 10);

        let data = record.export_public_data();
        assert_eq!(data.len(), 2);
        assert_eq!(data["CompanyID"], Value::Int(3));
        assert_eq!(data["CompanyName"], Value::from("abc"));
    }

    #[test]
    fn duplicate_is_a_new_record_without_identifier() {
        let mut stored = FieldValues::new();
        stored.insert("CompanyName".to_string(), Value::from("GCD"));
        let record = Record::from_storage(company(), RecordId::Int(4), stored);
        assert!(record.is_loaded());

        let copy = record.duplicate();
        assert!(copy.is_new());
        assert!(copy.id().is_none());
        assert_eq!(copy.get("CompanyName"), Value::from("GCD"));
    }

    #[test]
    fn persisted_identifier_is_kept_and_overwrites_are_tracked() {
        let mut record = Record::from_storage(company(), RecordId::Int(1), FieldValues::new());
        record.set("CompanyID", 2);
        assert_eq!(record.id(), Some(&RecordId::Int(1)));
        assert!(record.identifier_changed());
        assert!(record.changed_native_values().is_empty());

        record.set("CompanyID", 1);
        assert!(!record.identifier_changed());
        assert!(!record.has_changes());
    }
}
