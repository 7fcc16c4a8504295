//! Data-access core: predicate trees, lazy collections and pluggable
//! repositories with capability negotiation.
//! This crate is the single source of truth for query and record invariants.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod schema;
pub mod service;

pub use cache::{ObjectCache, RecordHandle};
pub use config::{ConfigError, NegotiationPolicy, RepositoryKind, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use events::{EventContext, EventKind};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::record::Record;
pub use model::validation::{ConsistencyCheck, HasValue, ValidationErrors};
pub use model::value::{FieldValues, RecordId, Value};
pub use query::capability::{Capabilities, OperatorKind};
pub use query::filter::{BooleanOp, FieldSource, FilterNode, Operator, Predicate};
pub use query::sort::{RangeSpec, SortKey, SortSpec};
pub use repo::{
    open_repository, AppliedParts, FetchOutcome, FetchRequest, MemoryRepository, PersistOutcome,
    Repository, SqliteRepository,
};
pub use schema::{
    Cardinality, ColumnDef, ColumnKind, EntitySchema, IdentifierKind, Relationship,
    SchemaRegistry,
};
pub use service::collection::{Collection, CollectionIter};
pub use service::navigation::ColumnPath;
pub use service::session::Session;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
