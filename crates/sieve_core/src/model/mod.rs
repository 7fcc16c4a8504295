//! Record model: values, instances and consistency rules.
//!
//! # Responsibility
//! - Define the dynamically typed record shared by every entity type.
//! - Keep lifecycle flags (new, loaded, dirty) next to the data they describe.
//!
//! # Invariants
//! - Records are identified by `(entity, RecordId)` once persisted.
//! - Only storage hydration marks a record loaded.

pub mod record;
pub mod validation;
pub mod value;
