//! Error taxonomy shared by repositories, sessions and collections.
//!
//! # Invariants
//! - Failures surface synchronously to the caller; nothing here is retried.
//! - Consistency failures carry every field error collected, not just the first.

use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::validation::ValidationErrors;
use crate::model::value::RecordId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Hydration failed for the supplied identifier (or it was zero/empty).
    RecordNotFound {
        entity: String,
        id: Option<RecordId>,
    },
    /// A sort key names a column the entity does not declare.
    SortNotValid { entity: String, column: String },
    /// The filter cannot be applied natively by the mutation path.
    BatchUpdateNotPossible { entity: String, reason: String },
    ModelConsistency {
        entity: String,
        errors: ValidationErrors,
    },
    /// Deleting a record that was never persisted.
    DeleteModel { entity: String },
    /// Relationship path could not be resolved.
    InvalidPath(String),
    Config(ConfigError),
    Db(DbError),
    InvalidData(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &str, id: &RecordId) -> Self {
        Self::RecordNotFound {
            entity: entity.to_string(),
            id: Some(id.clone()),
        }
    }

    /// Field errors of a consistency failure; `None` for other errors.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::ModelConsistency { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordNotFound { entity, id: Some(id) } => {
                write!(f, "{entity} record not found: {id}")
            }
            Self::RecordNotFound { entity, id: None } => {
                write!(f, "{entity} record not found")
            }
            Self::SortNotValid { entity, column } => {
                write!(f, "cannot sort {entity} by unknown column `{column}`")
            }
            Self::BatchUpdateNotPossible { entity, reason } => {
                write!(f, "batch update of {entity} is not possible: {reason}")
            }
            Self::ModelConsistency { entity, errors } => {
                let fields = errors.keys().cloned().collect::<Vec<_>>().join(", ");
                write!(f, "{entity} record is not consistent: {fields}")
            }
            Self::DeleteModel { entity } => {
                write!(f, "cannot delete a new {entity} record that was never saved")
            }
            Self::InvalidPath(message) => write!(f, "invalid column path: {message}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
