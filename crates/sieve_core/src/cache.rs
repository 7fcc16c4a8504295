//! Identity map: at most one live record instance per (entity, identifier).
//!
//! # Invariants
//! - Two lookups of the same key return the same shared handle.
//! - No interior borrow is held while a record is being hydrated, so a
//!   hydrate callback may itself consult the cache.

use crate::model::record::Record;
use crate::model::value::RecordId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Shared, mutable handle to a cached record.
pub type RecordHandle = Rc<RefCell<Record>>;

type CacheKey = (String, RecordId);

#[derive(Debug, Default)]
pub struct ObjectCache {
    entries: RefCell<HashMap<CacheKey, RecordHandle>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: &str, id: &RecordId) -> Option<RecordHandle> {
        self.entries
            .borrow()
            .get(&(entity.to_string(), id.clone()))
            .cloned()
    }

    /// Returns the cached instance or builds, caches and returns a new one.
    pub fn get_or_create<E>(
        &self,
        entity: &str,
        id: &RecordId,
        create: impl FnOnce() -> Result<Record, E>,
    ) -> Result<RecordHandle, E> {
        if let Some(handle) = self.get(entity, id) {
            return Ok(handle);
        }
        let record = create()?;
        let mut entries = self.entries.borrow_mut();
        let handle = entries
            .entry((entity.to_string(), id.clone()))
            .or_insert_with(|| Rc::new(RefCell::new(record)));
        Ok(Rc::clone(handle))
    }

    /// Registers `handle` under its key, replacing any previous entry.
    pub fn insert(&self, entity: &str, id: RecordId, handle: RecordHandle) {
        self.entries
            .borrow_mut()
            .insert((entity.to_string(), id), handle);
    }

    pub fn evict(&self, entity: &str, id: &RecordId) -> Option<RecordHandle> {
        self.entries
            .borrow_mut()
            .remove(&(entity.to_string(), id.clone()))
    }

    pub fn contains(&self, entity: &str, id: &RecordId) -> bool {
        self.entries
            .borrow()
            .contains_key(&(entity.to_string(), id.clone()))
    }

    /// Drops every cached instance; outstanding handles stay valid.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
