//! Store configuration and repository binding.
//!
//! # Responsibility
//! - Describe which repository backend a session is bound to.
//! - Reject unknown or misconfigured bindings with a typed error.
//!
//! # Invariants
//! - The default binding is the offline (in-memory) repository.
//! - Configuration is a plain value passed explicitly; nothing here is global.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Manifest string for the in-memory repository.
pub const REPOSITORY_OFFLINE: &str = "offline";
/// Manifest string for the SQLite repository.
pub const REPOSITORY_SQLITE: &str = "sqlite";

/// Configuration and schema wiring errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownRepository(String),
    UnknownEntity(String),
    DuplicateEntity(String),
    InvalidName(String),
    UnknownRelationship { entity: String, name: String },
    InvalidLogging(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRepository(value) => {
                write!(f, "repository binding is unknown: {value}")
            }
            Self::UnknownEntity(value) => write!(f, "entity is not registered: {value}"),
            Self::DuplicateEntity(value) => write!(f, "entity already registered: {value}"),
            Self::InvalidName(value) => write!(f, "invalid schema name `{value}`"),
            Self::UnknownRelationship { entity, name } => {
                write!(f, "entity `{entity}` has no relationship `{name}`")
            }
            Self::InvalidLogging(message) => write!(f, "invalid logging config: {message}"),
        }
    }
}

impl Error for ConfigError {}

/// Repository backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryKind {
    /// In-memory store with no native query capability.
    #[default]
    Offline,
    /// SQLite store with native filtering, ordering and ranging.
    Sqlite,
}

impl RepositoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => REPOSITORY_OFFLINE,
            Self::Sqlite => REPOSITORY_SQLITE,
        }
    }

    /// Parses a binding name. `memory` is accepted as an alias of `offline`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            REPOSITORY_OFFLINE | "memory" => Ok(Self::Offline),
            REPOSITORY_SQLITE => Ok(Self::Sqlite),
            other => Err(ConfigError::UnknownRepository(other.to_string())),
        }
    }
}

/// Explicit store configuration handed to `open_repository`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub repository: RepositoryKind,
    /// SQLite database file. `None` opens an in-memory database.
    pub sqlite_path: Option<PathBuf>,
    /// Lets the SQL backend narrow candidates with the native members of a
    /// top-level AND list when the whole filter cannot be pushed down.
    pub partial_filter_pushdown: bool,
}

impl StoreConfig {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn sqlite(path: Option<PathBuf>) -> Self {
        Self {
            repository: RepositoryKind::Sqlite,
            sqlite_path: path,
            partial_filter_pushdown: false,
        }
    }

    pub fn negotiation_policy(&self) -> NegotiationPolicy {
        NegotiationPolicy {
            narrow_top_level_and: self.partial_filter_pushdown,
        }
    }
}

/// Knobs for the repository capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiationPolicy {
    pub narrow_top_level_and: bool,
}
