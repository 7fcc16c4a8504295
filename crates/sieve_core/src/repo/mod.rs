//! Repository layer: the storage boundary behind collections and sessions.
//!
//! # Responsibility
//! - Define the storage contract every backend implements.
//! - Report which parts of a query a backend applied natively so the caller
//!   can finish the rest in memory.
//!
//! # Invariants
//! - `AppliedParts::range` is never true while `AppliedParts::sort` or
//!   `AppliedParts::filter` is false.
//! - Identifiers come back in the backend's final order.
//!
//! # See also
//! - `negotiate` for the push-down decision procedure.

pub mod memory_repo;
pub mod negotiate;
pub mod sqlite_repo;

use crate::config::{RepositoryKind, StoreConfig};
use crate::db::{open_db, open_db_in_memory};
use crate::error::StoreResult;
use crate::model::record::Record;
use crate::model::value::{FieldValues, RecordId};
use crate::query::capability::Capabilities;
use crate::query::filter::FilterNode;
use crate::query::sort::{RangeSpec, SortSpec};
use crate::schema::{EntitySchema, SchemaRegistry};
use log::info;

pub use memory_repo::MemoryRepository;
pub use sqlite_repo::SqliteRepository;

/// Query handed to `Repository::fetch_identifiers`.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub filter: &'a FilterNode,
    pub sort: &'a SortSpec,
    pub range: Option<RangeSpec>,
}

/// Which parts of a fetch the backend applied itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedParts {
    pub filter: bool,
    pub sort: bool,
    pub range: bool,
}

/// Ordered identifiers plus what is still left to do in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub ids: Vec<RecordId>,
    pub applied: AppliedParts,
}

/// Result of persisting one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub id: RecordId,
    /// False when there was nothing to write.
    pub written: bool,
}

/// Storage boundary for one backend.
///
/// Calls are blocking; each one is atomic for a single record.
pub trait Repository {
    fn kind(&self) -> RepositoryKind;
    /// Filters and orderings the backend evaluates natively on reads.
    fn read_capabilities(&self, schema: &EntitySchema) -> Capabilities;
    /// Filters the backend can use to select rows for a batch update.
    fn mutation_capabilities(&self, schema: &EntitySchema) -> Capabilities;
    fn fetch_identifiers(
        &self,
        schema: &EntitySchema,
        request: &FetchRequest<'_>,
    ) -> StoreResult<FetchOutcome>;
    /// Loads stored column values; `RecordNotFound` when absent.
    fn hydrate(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<FieldValues>;
    /// Inserts a new record or writes the changed columns of an existing one.
    ///
    /// New records must already carry their identifier unless the schema
    /// uses `IdentifierKind::AutoIncrement`.
    fn persist(&self, schema: &EntitySchema, record: &Record) -> StoreResult<PersistOutcome>;
    fn delete(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<()>;
    /// Writes `values` to every row matching `filter`; returns the row count.
    ///
    /// Fails with `BatchUpdateNotPossible` unless the filter is natively
    /// supported by `mutation_capabilities`.
    fn batch_apply(
        &self,
        schema: &EntitySchema,
        filter: &FilterNode,
        values: &FieldValues,
    ) -> StoreResult<usize>;
}

impl<R: Repository + ?Sized> Repository for Box<R> {
    fn kind(&self) -> RepositoryKind {
        (**self).kind()
    }

    fn read_capabilities(&self, schema: &EntitySchema) -> Capabilities {
        (**self).read_capabilities(schema)
    }

    fn mutation_capabilities(&self, schema: &EntitySchema) -> Capabilities {
        (**self).mutation_capabilities(schema)
    }

    fn fetch_identifiers(
        &self,
        schema: &EntitySchema,
        request: &FetchRequest<'_>,
    ) -> StoreResult<FetchOutcome> {
        (**self).fetch_identifiers(schema, request)
    }

    fn hydrate(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<FieldValues> {
        (**self).hydrate(schema, id)
    }

    fn persist(&self, schema: &EntitySchema, record: &Record) -> StoreResult<PersistOutcome> {
        (**self).persist(schema, record)
    }

    fn delete(&self, schema: &EntitySchema, id: &RecordId) -> StoreResult<()> {
        (**self).delete(schema, id)
    }

    fn batch_apply(
        &self,
        schema: &EntitySchema,
        filter: &FilterNode,
        values: &FieldValues,
    ) -> StoreResult<usize> {
        (**self).batch_apply(schema, filter, values)
    }
}

/// Builds the repository selected by `config`, with tables ready for every
/// registered entity.
pub fn open_repository(
    config: &StoreConfig,
    schemas: &SchemaRegistry,
) -> StoreResult<Box<dyn Repository>> {
    info!(
        "event=repo_open module=repo status=start kind={} entities={}",
        config.repository.as_str(),
        schemas.len()
    );
    let repository: Box<dyn Repository> = match config.repository {
        RepositoryKind::Offline => Box::new(MemoryRepository::new()),
        RepositoryKind::Sqlite => {
            let conn = match &config.sqlite_path {
                Some(path) => open_db(path)?,
                None => open_db_in_memory()?,
            };
            Box::new(
                SqliteRepository::try_new(conn, schemas)?
                    .with_policy(config.negotiation_policy()),
            )
        }
    };
    info!(
        "event=repo_open module=repo status=ok kind={}",
        config.repository.as_str()
    );
    Ok(repository)
}
