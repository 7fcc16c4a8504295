//! Session: one explicit scope for repository, identity map, events and
//! consistency checks.
//!
//! # Responsibility
//! - Provide record lifecycle entry points (create, load, save, delete).
//! - Route every load through the object cache so each stored record has at
//!   most one live instance per session.
//!
//! # Invariants
//! - `save` publishes `BeforeSave` only when there is something to write, and
//!   `AfterSave` only after storage confirmed a write.
//! - Consistency failures are aggregated and raised once, before persisting.
//! - Deleting a record that was never persisted fails with `DeleteModel`.

use crate::cache::{ObjectCache, RecordHandle};
use crate::error::{StoreError, StoreResult};
use crate::events::{EventBus, EventContext, EventKind};
use crate::model::record::Record;
use crate::model::validation::{ConsistencyCheck, ValidationErrors};
use crate::model::value::{RecordId, Value};
use crate::query::filter::FilterNode;
use crate::repo::Repository;
use crate::schema::{EntitySchema, IdentifierKind, SchemaRegistry};
use crate::service::collection::Collection;
use log::{debug, info};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Unit of work bound to one repository.
pub struct Session<R: Repository> {
    repo: R,
    schemas: SchemaRegistry,
    cache: ObjectCache,
    events: EventBus,
    checks: BTreeMap<String, Vec<Box<dyn ConsistencyCheck>>>,
}

impl<R: Repository> Session<R> {
    pub fn new(repo: R, schemas: SchemaRegistry) -> Self {
        Self {
            repo,
            schemas,
            cache: ObjectCache::new(),
            events: EventBus::new(),
            checks: BTreeMap::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn schema(&self, entity: &str) -> StoreResult<Arc<EntitySchema>> {
        Ok(self.schemas.get(entity)?)
    }

    /// Registers a lifecycle or custom event handler for `entity`.
    pub fn subscribe(
        &mut self,
        entity: impl Into<String>,
        kind: EventKind,
        handler: impl Fn(&EventContext<'_>) + 'static,
    ) {
        self.events.subscribe(entity, kind, handler);
    }

    /// Adds a consistency rule evaluated before every save of `entity`.
    pub fn add_consistency_check(
        &mut self,
        entity: impl Into<String>,
        check: impl ConsistencyCheck + 'static,
    ) {
        self.checks
            .entry(entity.into())
            .or_default()
            .push(Box::new(check));
    }

    /// New unsaved record with schema defaults. Not cached until saved.
    pub fn create(&self, entity: &str) -> StoreResult<RecordHandle> {
        let schema = self.schema(entity)?;
        Ok(Rc::new(RefCell::new(Record::new(schema))))
    }

    /// Loads a stored record through the identity map.
    ///
    /// Identifier zero or blank text is rejected as `RecordNotFound` without
    /// touching storage.
    pub fn load(&self, entity: &str, id: impl Into<RecordId>) -> StoreResult<RecordHandle> {
        let schema = self.schema(entity)?;
        self.hydrate_cached(&schema, &id.into())
    }

    pub(crate) fn hydrate_cached(
        &self,
        schema: &Arc<EntitySchema>,
        id: &RecordId,
    ) -> StoreResult<RecordHandle> {
        if !id.is_valid() {
            return Err(StoreError::not_found(&schema.name, id));
        }
        self.cache.get_or_create(&schema.name, id, || {
            let stored = self.repo.hydrate(schema, id)?;
            Ok(Record::from_storage(Arc::clone(schema), id.clone(), stored))
        })
    }

    /// Persists the record when it is new or changed.
    ///
    /// Returns whether storage was written.
    pub fn save(&self, handle: &RecordHandle) -> StoreResult<bool> {
        let schema = Arc::clone(handle.borrow().schema());
        {
            let record = handle.borrow();
            if !record.is_new() && !record.has_changes() {
                return Ok(false);
            }
            self.ensure_single_instance(handle, &record)?;
            self.events.publish(&EventKind::BeforeSave, &record, &[]);
            self.ensure_consistent(&record)?;
        }

        {
            let mut record = handle.borrow_mut();
            if record.is_new()
                && record.id().is_none()
                && schema.identifier.kind == IdentifierKind::Uuid
            {
                record.assign_id(RecordId::Text(Uuid::new_v4().to_string()));
            }
        }

        let was_new = handle.borrow().is_new();
        let outcome = self.repo.persist(&schema, &handle.borrow())?;
        handle.borrow_mut().mark_persisted(outcome.id.clone());
        if was_new {
            self.cache
                .insert(&schema.name, outcome.id.clone(), Rc::clone(handle));
        }
        debug!(
            "event=record_save module=session status=ok entity={} inserted={} written={}",
            schema.name, was_new, outcome.written
        );
        if !outcome.written {
            return Ok(false);
        }

        let record = handle.borrow();
        self.events.publish(&EventKind::AfterSave, &record, &[]);
        drop(record);
        let deferred = handle.borrow_mut().take_after_save();
        let record = handle.borrow();
        for (kind, payload) in deferred {
            self.events.publish(&kind, &record, &payload);
        }
        Ok(true)
    }

    /// Rejects saves that would leave two live instances for one identifier:
    /// a persisted record whose identifier was overwritten, or a new record
    /// reusing the identifier of an instance already in the identity map.
    fn ensure_single_instance(&self, handle: &RecordHandle, record: &Record) -> StoreResult<()> {
        let entity = record.entity();
        if record.identifier_changed() {
            return Err(StoreError::InvalidData(format!(
                "identifier of {entity} {} cannot change once persisted",
                record.id().map(ToString::to_string).unwrap_or_default()
            )));
        }
        if !record.is_new() {
            return Ok(());
        }
        let Some(id) = record.id() else {
            return Ok(());
        };
        match self.cache.get(entity, id) {
            Some(live) if !Rc::ptr_eq(&live, handle) => Err(StoreError::InvalidData(format!(
                "{entity} {id} is already loaded in this session"
            ))),
            _ => Ok(()),
        }
    }

    /// Removes a persisted record from storage and from the identity map.
    pub fn delete(&self, handle: &RecordHandle) -> StoreResult<()> {
        let (schema, id) = persisted_key(handle);
        let Some(id) = id else {
            return Err(StoreError::DeleteModel {
                entity: schema.name.clone(),
            });
        };

        self.events
            .publish(&EventKind::BeforeDelete, &handle.borrow(), &[]);
        self.repo.delete(&schema, &id)?;
        self.cache.evict(&schema.name, &id);
        self.events
            .publish(&EventKind::AfterDelete, &handle.borrow(), &[]);
        debug!(
            "event=record_delete module=session status=ok entity={}",
            schema.name
        );
        Ok(())
    }

    /// Discards unsaved changes by re-reading stored values in place.
    pub fn reload(&self, handle: &RecordHandle) -> StoreResult<()> {
        let (schema, id) = persisted_key(handle);
        let Some(id) = id else {
            return Err(StoreError::RecordNotFound {
                entity: schema.name.clone(),
                id: None,
            });
        };
        let stored = self.repo.hydrate(&schema, &id)?;
        handle.borrow_mut().replace_stored(stored);
        Ok(())
    }

    /// Drops the identity map; later loads hydrate fresh instances.
    pub fn clear_cache(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!("event=cache_clear module=session status=ok dropped={dropped}");
    }

    /// Publishes `kind` for the record immediately.
    pub fn raise(&self, handle: &RecordHandle, kind: EventKind, payload: &[Value]) {
        self.events.publish(&kind, &handle.borrow(), payload);
    }

    /// Publishes `kind` after the next save that writes the record.
    pub fn raise_after_save(&self, handle: &RecordHandle, kind: EventKind, payload: Vec<Value>) {
        handle.borrow_mut().defer_after_save(kind, payload);
    }

    /// Runs every registered check for the record's entity.
    pub fn consistency_errors(&self, record: &Record) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if let Some(checks) = self.checks.get(record.entity()) {
            for check in checks {
                check.check(record, &mut errors);
            }
        }
        errors
    }

    pub fn ensure_consistent(&self, record: &Record) -> StoreResult<()> {
        let errors = self.consistency_errors(record);
        if errors.is_empty() {
            return Ok(());
        }
        Err(StoreError::ModelConsistency {
            entity: record.entity().to_string(),
            errors,
        })
    }

    /// Unfiltered, unsorted collection over `entity`.
    pub fn collection(&self, entity: &str) -> StoreResult<Collection<'_, R>> {
        Ok(Collection::new(self, self.schema(entity)?))
    }

    /// First record matching `filter` in identifier order, if any.
    pub fn find(&self, entity: &str, filter: FilterNode) -> StoreResult<Option<RecordHandle>> {
        let mut collection = self.collection(entity)?;
        collection.replace_filter(filter);
        collection.get(0)
    }
}

/// Schema and identifier of a record; the identifier is `None` until the
/// record has been persisted.
fn persisted_key(handle: &RecordHandle) -> (Arc<EntitySchema>, Option<RecordId>) {
    let record = handle.borrow();
    let id = if record.is_new() {
        None
    } else {
        record.id().cloned()
    };
    (Arc::clone(record.schema()), id)
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::error::StoreError;
    use crate::events::EventKind;
    use crate::model::validation::HasValue;
    use crate::model::value::{RecordId, Value};
    use crate::repo::MemoryRepository;
    use crate::schema::{ColumnDef, EntitySchema, IdentifierKind, SchemaRegistry};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session() -> Session<MemoryRepository> {
        let mut schemas = SchemaRegistry::new();
        schemas
            .register(
                EntitySchema::builder("Company", "tblCompany")
                    .identifier("CompanyID", IdentifierKind::AutoIncrement)
                    .column(ColumnDef::text("CompanyName"))
                    .build()
                    .expect("valid schema"),
            )
            .expect("register");
        Session::new(MemoryRepository::new(), schemas)
    }

    #[test]
    fn save_publishes_before_and_after_only_when_written() {
        let mut session = session();
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::BeforeSave, EventKind::AfterSave] {
            let sink = Rc::clone(&log);
            session.subscribe("Company", kind, move |context| {
                sink.borrow_mut().push(context.kind.clone());
            });
        }

        let record = session.create("Company").expect("create");
        record.borrow_mut().set("CompanyName", "GCD");
        assert!(session.save(&record).expect("insert"));
        assert!(!session.save(&record).expect("unchanged"));
        assert_eq!(
            *log.borrow(),
            vec![EventKind::BeforeSave, EventKind::AfterSave]
        );
    }

    #[test]
    fn consistency_errors_abort_the_save() {
        let mut session = session();
        session.add_consistency_check("Company", HasValue::new("CompanyName"));
        let record = session.create("Company").expect("create");

        let err = session.save(&record).expect_err("missing name");
        assert!(err.validation_errors().is_some_and(|e| e.contains_key("CompanyName")));
        assert!(record.borrow().is_new());
    }

    #[test]
    fn deferred_events_fire_after_the_write() {
        let mut session = session();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        session.subscribe("Company", EventKind::custom("Renamed"), move |context| {
            sink.borrow_mut()
                .push((context.record.is_new(), context.payload.to_vec()));
        });

        let record = session.create("Company").expect("create");
        record.borrow_mut().set("CompanyName", "GCD");
        session.raise_after_save(&record, EventKind::custom("Renamed"), vec![Value::Int(7)]);
        assert!(seen.borrow().is_empty());

        session.save(&record).expect("save");
        assert_eq!(*seen.borrow(), vec![(false, vec![Value::Int(7)])]);
    }

    #[test]
    fn identifier_overwrite_on_a_persisted_record_is_rejected() {
        let session = session();
        for name in ["A", "B"] {
            let record = session.create("Company").expect("create");
            record.borrow_mut().set("CompanyName", name);
            session.save(&record).expect("save");
        }

        let first = session.load("Company", 1).expect("load");
        first.borrow_mut().set("CompanyID", 2);
        first.borrow_mut().set("CompanyName", "X");
        assert!(matches!(
            session.save(&first),
            Err(StoreError::InvalidData(_))
        ));

        let second = session.load("Company", 2).expect("load");
        assert_eq!(second.borrow().get("CompanyName"), Value::from("B"));
        assert_eq!(first.borrow().id(), Some(&RecordId::Int(1)));
    }

    #[test]
    fn new_records_cannot_be_deleted() {
        let session = session();
        let record = session.create("Company").expect("create");
        assert!(matches!(
            session.delete(&record),
            Err(StoreError::DeleteModel { .. })
        ));
    }

    #[test]
    fn zero_identifier_is_not_found() {
        let session = session();
        let err = session.load("Company", 0).expect_err("id zero is invalid");
        assert!(matches!(
            err,
            StoreError::RecordNotFound {
                id: Some(RecordId::Int(0)),
                ..
            }
        ));
    }
}
