//! In-memory repository for offline use and tests.
//!
//! Declares no native capabilities: every fetch returns all identifiers of
//! the entity and leaves filtering, ordering and ranging to the collection.

use crate::config::RepositoryKind;
use crate::error::{StoreError, StoreResult};
use crate::model::record::Record;
use crate::model::value::{FieldValues, RecordId};
use crate::query::capability::Capabilities;
use crate::query::filter::FilterNode;
use crate::repo::{AppliedParts, FetchOutcome, FetchRequest, PersistOutcome, Repository};
use crate::schema::{EntitySchema, IdentifierKind};
use log::debug;
use std::cell::RefCell;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<RecordId, FieldValues>,
    next_id: i64,
}

impl MemoryTable {
    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId::Int(self.next_id)
    }

    fn observe_id(&mut self, id: &RecordId) {
        if let RecordId::Int(number) = id {
            self.next_id = self.next_id.max(*number);
        }
    }
}

/// Repository keeping rows in process memory, keyed by entity name.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RefCell<BTreeMap<String, MemoryTable>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows for `entity`.
    pub fn row_count(&self, entity: &str) -> usize {
        self.tables
            .borrow()
            .get(entity)
            .map_or(0, |table| table.rows.len())
    }
}

impl Repository for MemoryRepository {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Offline
    }

    fn read_capabilities(&self, _schema: &EntitySchema) -> Capabilities {
        Capabilities::none()
    }

    fn mutation_capabilities(&self, _schema: &EntitySchema) -> Capabilities {
        Capabilities::none()
    }

    fn fetch_identifiers(
        &self,
        schema: &EntitySchema,
        _request: &FetchRequest<'_>,
    ) -> StoreResult<FetchOutcome> {
        let ids: Vec<RecordId> = self
            .tables
            .borrow()
            .get(&schema.name)
            .map(|table| table.rows.keys().cloned().collect())
            .unwrap_or_default();
        debug!(
            "event=repo_fetch module=repo status=ok kind=offline entity={} rows={}",
            schema.name,
            ids.len()
        );
        Ok(FetchOutcome {
            ids,
            applied: AppliedParts::default(),
        })
    }

    fn hydrate(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<FieldValues> {
        self.tables
            .borrow()
            .get(&schema.name)
            .and_then(|table| table.rows.get(id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(&schema.name, id))
    }

    fn persist(&self, schema: &EntitySchema, record: &Record) -> StoreResult<PersistOutcome> {
        let mut tables = self.tables.borrow_mut();
        let table = tables.entry(schema.name.clone()).or_default();

        if !record.is_new() {
            let Some(id) = record.id().cloned() else {
                return Err(StoreError::InvalidData(format!(
                    "{} record has no identifier",
                    schema.name
                )));
            };
            let changed = record.changed_native_values();
            let Some(row) = table.rows.get_mut(&id) else {
                return Err(StoreError::not_found(&schema.name, &id));
            };
            if changed.is_empty() {
                return Ok(PersistOutcome { id, written: false });
            }
            row.extend(changed);
            return Ok(PersistOutcome { id, written: true });
        }

        let id = match (record.id(), schema.identifier.kind) {
            (Some(id), _) => id.clone(),
            (None, IdentifierKind::AutoIncrement) => table.allocate_id(),
            (None, _) => {
                return Err(StoreError::InvalidData(format!(
                    "{} record has no identifier in column `{}`",
                    schema.name,
                    schema.identifier_column()
                )))
            }
        };
        table.observe_id(&id);
        table.rows.insert(id.clone(), record.native_values());
        Ok(PersistOutcome { id, written: true })
    }

    fn delete(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<()> {
        let removed = self
            .tables
            .borrow_mut()
            .get_mut(&schema.name)
            .and_then(|table| table.rows.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(&schema.name, id)),
        }
    }

    fn batch_apply(
        &self,
        schema: &EntitySchema,
        filter: &FilterNode,
        values: &FieldValues,
    ) -> StoreResult<usize> {
        if !filter.natively_supported_by(&self.mutation_capabilities(schema)) {
            return Err(StoreError::BatchUpdateNotPossible {
                entity: schema.name.clone(),
                reason: "filter is not natively supported by the store".to_string(),
            });
        }
        if let Some(column) = schema.unwritable_column(values) {
            return Err(StoreError::BatchUpdateNotPossible {
                entity: schema.name.clone(),
                reason: format!("column `{column}` is not a stored column"),
            });
        }
        let mut tables = self.tables.borrow_mut();
        let Some(table) = tables.get_mut(&schema.name) else {
            return Ok(0);
        };
        for row in table.rows.values_mut() {
            for (column, value) in values {
                let value = match schema.column(column) {
                    Some(definition) => definition.kind.coerce(value.clone()),
                    None => value.clone(),
                };
                row.insert(column.clone(), value);
            }
        }
        Ok(table.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryRepository;
    use crate::error::StoreError;
    use crate::model::record::Record;
    use crate::model::value::{FieldValues, RecordId, Value};
    use crate::query::filter::FilterNode;
    use crate::query::sort::{RangeSpec, SortSpec};
    use crate::repo::{FetchRequest, Repository};
    use crate::schema::{ColumnDef, EntitySchema, IdentifierKind};
    use std::sync::Arc;

    fn schema() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::builder("Company", "tblCompany")
                .identifier("CompanyID", IdentifierKind::AutoIncrement)
                .column(ColumnDef::text("CompanyName"))
                .column(ColumnDef::integer("Balance"))
                .build()
                .expect("valid schema"),
        )
    }

    fn insert(repo: &MemoryRepository, schema: &Arc<EntitySchema>, name: &str) -> RecordId {
        let mut record = Record::new(Arc::clone(schema));
        record.set("CompanyName", name);
        repo.persist(schema, &record).expect("persist").id
    }

    #[test]
    fn fetch_returns_every_identifier_and_applies_nothing() {
        let repo = MemoryRepository::new();
        let schema = schema();
        insert(&repo, &schema, "a");
        insert(&repo, &schema, "b");

        let filter = FilterNode::equals("CompanyName", "a");
        let sort: SortSpec = [("CompanyName", false)].into_iter().collect();
        let outcome = repo
            .fetch_identifiers(
                &schema,
                &FetchRequest {
                    filter: &filter,
                    sort: &sort,
                    range: Some(RangeSpec::new(0, 1)),
                },
            )
            .expect("fetch");
        assert_eq!(outcome.ids, vec![RecordId::Int(1), RecordId::Int(2)]);
        assert!(!outcome.applied.filter && !outcome.applied.sort && !outcome.applied.range);
    }

    #[test]
    fn explicit_identifiers_advance_the_counter() {
        let repo = MemoryRepository::new();
        let schema = schema();
        let mut record = Record::new(Arc::clone(&schema));
        record.set("CompanyID", 10);
        repo.persist(&schema, &record).expect("persist");

        assert_eq!(insert(&repo, &schema, "next"), RecordId::Int(11));
        assert_eq!(repo.row_count("Company"), 2);
    }

    #[test]
    fn batch_apply_needs_an_always_true_filter() {
        let repo = MemoryRepository::new();
        let schema = schema();
        insert(&repo, &schema, "a");

        let mut values = FieldValues::new();
        values.insert("Balance".to_string(), Value::Int(5));
        let err = repo
            .batch_apply(&schema, &FilterNode::equals("CompanyName", "a"), &values)
            .expect_err("filtered batch update is not native");
        assert!(matches!(err, StoreError::BatchUpdateNotPossible { .. }));

        assert_eq!(
            repo.batch_apply(&schema, &FilterNode::all(), &values)
                .expect("unfiltered batch update"),
            1
        );
        let stored = repo.hydrate(&schema, &RecordId::Int(1)).expect("hydrate");
        assert_eq!(stored["Balance"], Value::Int(5));

        values.insert("Nickname".to_string(), Value::from("x"));
        let err = repo
            .batch_apply(&schema, &FilterNode::all(), &values)
            .expect_err("undeclared columns are not writable");
        assert!(matches!(err, StoreError::BatchUpdateNotPossible { .. }));
        let stored = repo.hydrate(&schema, &RecordId::Int(1)).expect("hydrate");
        assert!(!stored.contains_key("Nickname"));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let repo = MemoryRepository::new();
        let schema = schema();
        assert!(matches!(
            repo.hydrate(&schema, &RecordId::Int(3)),
            Err(StoreError::RecordNotFound { .. })
        ));
        assert!(matches!(
            repo.delete(&schema, &RecordId::Int(3)),
            Err(StoreError::RecordNotFound { .. })
        ));
    }
}
