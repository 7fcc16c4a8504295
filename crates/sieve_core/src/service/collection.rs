//! Lazy, mutable query over one entity type.
//!
//! # Responsibility
//! - Hold filter, sort and range until a read needs the result.
//! - Ask the repository for as much native work as it can do, then finish
//!   filtering, ordering and ranging in memory, strictly in that order.
//!
//! # Invariants
//! - Every mutator marks the materialized result stale; nothing is validated
//!   eagerly.
//! - Sort columns are checked against the schema when the collection is
//!   materialized, never when the key is added.
//! - Reading twice without a mutation in between returns the same identifiers
//!   in the same order, given unchanged storage.
//! - Iteration walks a snapshot; mutating the collection during iteration
//!   affects the next read only.

use crate::cache::RecordHandle;
use crate::error::{StoreError, StoreResult};
use crate::model::value::{FieldValues, RecordId, Value};
use crate::query::filter::{FieldSource, FilterNode};
use crate::query::sort::{RangeSpec, SortSpec};
use crate::repo::{AppliedParts, FetchRequest, Repository};
use crate::schema::EntitySchema;
use crate::service::session::Session;
use log::{debug, info};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

/// Query description bound to a session and an entity type.
pub struct Collection<'s, R: Repository> {
    session: &'s Session<R>,
    schema: Arc<EntitySchema>,
    filter: FilterNode,
    sort: SortSpec,
    range: Option<RangeSpec>,
    materialized: Option<Rc<[RecordId]>>,
    applied: Option<AppliedParts>,
}

impl<'s, R: Repository> Collection<'s, R> {
    pub(crate) fn new(session: &'s Session<R>, schema: Arc<EntitySchema>) -> Self {
        Self {
            session,
            schema,
            filter: FilterNode::all(),
            sort: SortSpec::new(),
            range: None,
            materialized: None,
            applied: None,
        }
    }

    pub fn entity(&self) -> &str {
        &self.schema.name
    }

    pub fn filter(&self) -> &FilterNode {
        &self.filter
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn range(&self) -> Option<RangeSpec> {
        self.range
    }

    /// ANDs `node` onto the current filter.
    pub fn add_filter(&mut self, node: FilterNode) -> &mut Self {
        self.filter = std::mem::take(&mut self.filter).and_also(node);
        self.refresh()
    }

    pub fn replace_filter(&mut self, node: FilterNode) -> &mut Self {
        self.filter = node;
        self.refresh()
    }

    /// Appends a sort key after the existing ones.
    pub fn add_sort(&mut self, column: impl Into<String>, ascending: bool) -> &mut Self {
        self.sort.push(column, ascending);
        self.refresh()
    }

    /// Discards every existing sort key and uses `keys` in order.
    pub fn replace_sort<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        self.sort = keys.into_iter().collect();
        self.refresh()
    }

    pub fn set_range(&mut self, offset: usize, count: usize) -> &mut Self {
        self.range = Some(RangeSpec::new(offset, count));
        self.refresh()
    }

    pub fn clear_range(&mut self) -> &mut Self {
        self.range = None;
        self.refresh()
    }

    /// Marks the result stale so the next read queries storage again.
    pub fn refresh(&mut self) -> &mut Self {
        self.materialized = None;
        self
    }

    /// Which parts of the last fetch the repository applied natively.
    pub fn negotiation(&self) -> Option<AppliedParts> {
        self.applied
    }

    pub fn count(&mut self) -> StoreResult<usize> {
        Ok(self.materialize()?.len())
    }

    pub fn is_empty(&mut self) -> StoreResult<bool> {
        Ok(self.count()? == 0)
    }

    pub fn ids(&mut self) -> StoreResult<Vec<RecordId>> {
        Ok(self.materialize()?.to_vec())
    }

    /// Record at `index` of the materialized result.
    pub fn get(&mut self, index: usize) -> StoreResult<Option<RecordHandle>> {
        let ids = self.materialize()?;
        match ids.get(index) {
            Some(id) => self.session.hydrate_cached(&self.schema, id).map(Some),
            None => Ok(None),
        }
    }

    /// First record; `RecordNotFound` when the collection is empty.
    pub fn first(&mut self) -> StoreResult<RecordHandle> {
        self.get(0)?.ok_or_else(|| StoreError::RecordNotFound {
            entity: self.schema.name.clone(),
            id: None,
        })
    }

    pub fn to_vec(&mut self) -> StoreResult<Vec<RecordHandle>> {
        self.iter()?.collect()
    }

    /// Iterates a snapshot of the current result.
    pub fn iter(&mut self) -> StoreResult<CollectionIter<'s, R>> {
        let ids = self.materialize()?;
        Ok(CollectionIter {
            session: self.session,
            schema: Arc::clone(&self.schema),
            ids,
            position: 0,
        })
    }

    /// Stamps the filter's equality values onto `handle`, saves it, and marks
    /// the collection stale.
    pub fn append(&mut self, handle: &RecordHandle) -> StoreResult<bool> {
        if handle.borrow().entity() != self.schema.name {
            return Err(StoreError::InvalidData(format!(
                "cannot append a {} record to a {} collection",
                handle.borrow().entity(),
                self.schema.name
            )));
        }
        handle
            .borrow_mut()
            .import_data(self.filter.equality_values());
        let written = self.session.save(handle)?;
        self.refresh();
        Ok(written)
    }

    /// Writes `values` to every record of the collection.
    ///
    /// Runs as one native mutation when the repository can select the rows
    /// itself and every value targets a stored column. Otherwise fails with
    /// `BatchUpdateNotPossible`, unless `allow_unsafe` is set, in which case
    /// every record is loaded, changed and saved one at a time.
    pub fn batch_update(&mut self, values: FieldValues, allow_unsafe: bool) -> StoreResult<usize> {
        let started_at = Instant::now();
        let session = self.session;
        let repo = session.repository();
        let blocker = if self.range.is_some() {
            Some("a range cannot be applied by the store".to_string())
        } else if !self
            .filter
            .natively_supported_by(&repo.mutation_capabilities(&self.schema))
        {
            Some("filter cannot be applied by the store".to_string())
        } else {
            self.schema
                .unwritable_column(&values)
                .map(|column| format!("column `{column}` is not a stored column"))
        };
        let native = blocker.is_none();

        let updated = if native {
            let targets = self.native_targets()?;
            let updated = repo.batch_apply(&self.schema, &self.filter, &values)?;
            for id in &targets {
                if let Some(handle) = session.cache().get(&self.schema.name, id) {
                    handle.borrow_mut().apply_stored(&values);
                }
            }
            updated
        } else if allow_unsafe {
            let handles = self.to_vec()?;
            for handle in &handles {
                handle.borrow_mut().import_data(values.clone());
                session.save(handle)?;
            }
            handles.len()
        } else {
            return Err(StoreError::BatchUpdateNotPossible {
                entity: self.schema.name.clone(),
                reason: blocker.unwrap_or_default(),
            });
        };

        self.refresh();
        info!(
            "event=collection_batch_update module=collection status=ok entity={} native={} rows={} duration_ms={}",
            self.schema.name,
            native,
            updated,
            started_at.elapsed().as_millis()
        );
        Ok(updated)
    }

    /// Identifiers a native batch mutation is about to touch.
    fn native_targets(&self) -> StoreResult<Vec<RecordId>> {
        let repo = self.session.repository();
        let sort = SortSpec::new();
        let outcome = repo.fetch_identifiers(
            &self.schema,
            &FetchRequest {
                filter: &self.filter,
                sort: &sort,
                range: None,
            },
        )?;
        if outcome.applied.filter || self.filter.is_always_true() {
            return Ok(outcome.ids);
        }

        let mut targets = Vec::new();
        for id in outcome.ids {
            let mut stored = repo.hydrate(&self.schema, &id)?;
            stored.insert(
                self.schema.identifier_column().to_string(),
                Value::from(id.clone()),
            );
            if self.filter.evaluate(&stored) {
                targets.push(id);
            }
        }
        Ok(targets)
    }

    fn materialize(&mut self) -> StoreResult<Rc<[RecordId]>> {
        if let Some(ids) = &self.materialized {
            return Ok(Rc::clone(ids));
        }
        let started_at = Instant::now();

        if let Some(key) = self
            .sort
            .keys()
            .iter()
            .find(|key| !self.schema.has_column(&key.column))
        {
            return Err(StoreError::SortNotValid {
                entity: self.schema.name.clone(),
                column: key.column.clone(),
            });
        }

        let request = FetchRequest {
            filter: &self.filter,
            sort: &self.sort,
            range: self.range,
        };
        let outcome = self
            .session
            .repository()
            .fetch_identifiers(&self.schema, &request)?;
        let applied = outcome.applied;
        if self.range.is_some() && applied.range && !(applied.sort && applied.filter) {
            return Err(StoreError::InvalidData(format!(
                "repository applied a range to {} before completing filter and sort",
                self.schema.name
            )));
        }

        let range_done = applied.range || self.range.is_none();
        let ids: Vec<RecordId> = if applied.filter && applied.sort && range_done {
            outcome.ids
        } else {
            let mut candidates = Vec::with_capacity(outcome.ids.len());
            for id in outcome.ids {
                let handle = self.session.hydrate_cached(&self.schema, &id)?;
                candidates.push(Candidate { id, handle });
            }
            if !applied.filter {
                candidates.retain(|candidate| self.filter.evaluate(candidate));
            }
            if !applied.sort {
                candidates = self.sort.sort_in_memory(candidates);
            }
            if let (Some(range), false) = (self.range, applied.range) {
                candidates = range.apply(candidates);
            }
            candidates.into_iter().map(|candidate| candidate.id).collect()
        };

        debug!(
            "event=collection_materialize module=collection status=ok entity={} filter_native={} sort_native={} range_native={} rows={} duration_ms={}",
            self.schema.name,
            applied.filter,
            applied.sort,
            applied.range,
            ids.len(),
            started_at.elapsed().as_millis()
        );
        let ids: Rc<[RecordId]> = Rc::from(ids);
        self.materialized = Some(Rc::clone(&ids));
        self.applied = Some(applied);
        Ok(ids)
    }
}

/// Record awaiting in-memory filtering and ordering.
struct Candidate {
    id: RecordId,
    handle: RecordHandle,
}

impl FieldSource for Candidate {
    fn field(&self, column: &str) -> Value {
        self.handle.borrow().get(column)
    }
}

/// Iterator over a materialized snapshot; yields records through the
/// session's identity map.
pub struct CollectionIter<'s, R: Repository> {
    session: &'s Session<R>,
    schema: Arc<EntitySchema>,
    ids: Rc<[RecordId]>,
    position: usize,
}

impl<R: Repository> Iterator for CollectionIter<'_, R> {
    type Item = StoreResult<RecordHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.get(self.position)?;
        self.position += 1;
        Some(self.session.hydrate_cached(&self.schema, id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ids.len() - self.position;
        (remaining, Some(remaining))
    }
}
