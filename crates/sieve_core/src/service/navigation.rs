//! Typed relationship navigation and dotted column paths.
//!
//! # Responsibility
//! - Resolve declared relationships through the session's identity map, so a
//!   related record reached twice is the same instance.
//! - Parse `Relation.Relation.Column` paths once and resolve them against
//!   schemas and records.

use crate::cache::RecordHandle;
use crate::config::ConfigError;
use crate::error::{StoreError, StoreResult};
use crate::model::value::{RecordId, Value};
use crate::query::filter::FilterNode;
use crate::repo::Repository;
use crate::schema::{is_valid_name, Cardinality, EntitySchema, Relationship};
use crate::service::collection::Collection;
use crate::service::session::Session;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;

/// Relationship names followed by a final column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPath {
    relationships: Vec<String>,
    column: String,
}

impl ColumnPath {
    /// Parses `"Company.CompanyName"` style paths.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if let Some(bad) = segments.iter().find(|segment| !is_valid_name(segment)) {
            return Err(StoreError::InvalidPath(format!(
                "segment `{bad}` of `{path}` is not a valid name"
            )));
        }
        let column = segments.pop().unwrap_or_default();
        Ok(Self {
            relationships: segments,
            column,
        })
    }

    pub fn relationships(&self) -> &[String] {
        &self.relationships
    }

    pub fn column(&self) -> &str {
        &self.column
    }
}

impl Display for ColumnPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for relationship in &self.relationships {
            write!(f, "{relationship}.")?;
        }
        write!(f, "{}", self.column)
    }
}

impl<R: Repository> Session<R> {
    /// Follows a to-one relationship; `None` when the local column is empty.
    pub fn related_one(
        &self,
        handle: &RecordHandle,
        name: &str,
    ) -> StoreResult<Option<RecordHandle>> {
        let (relationship, local) = self.relationship_of(handle, name, Cardinality::One)?;
        if !local.has_value() {
            return Ok(None);
        }
        let target = self.schema(&relationship.target)?;
        if relationship.remote_column == target.identifier_column() {
            let Some(id) = RecordId::from_value(&local) else {
                return Ok(None);
            };
            return match self.hydrate_cached(&target, &id) {
                Ok(related) => Ok(Some(related)),
                Err(StoreError::RecordNotFound { .. }) => Ok(None),
                Err(err) => Err(err),
            };
        }
        self.find(
            &target.name,
            FilterNode::equals(relationship.remote_column.as_str(), local),
        )
    }

    /// Collection of records whose remote column equals the local value.
    pub fn related_many(&self, handle: &RecordHandle, name: &str) -> StoreResult<Collection<'_, R>> {
        let (relationship, local) = self.relationship_of(handle, name, Cardinality::Many)?;
        let mut collection = self.collection(&relationship.target)?;
        collection.replace_filter(FilterNode::equals(relationship.remote_column.as_str(), local));
        Ok(collection)
    }

    /// Reads the value at `path`; `Null` when a relationship on the way is
    /// unset.
    pub fn get_path(&self, handle: &RecordHandle, path: &ColumnPath) -> StoreResult<Value> {
        match self.walk(handle, path)? {
            Some(target) => Ok(target.borrow().get(path.column())),
            None => Ok(Value::Null),
        }
    }

    /// Writes the value at `path` on the related record without saving it.
    pub fn set_path(
        &self,
        handle: &RecordHandle,
        path: &ColumnPath,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        let Some(target) = self.walk(handle, path)? else {
            return Err(StoreError::InvalidPath(format!(
                "`{path}` passes through an unset relationship"
            )));
        };
        target.borrow_mut().set(path.column(), value);
        Ok(())
    }

    /// Schema owning the final column of `path`, starting at `entity`.
    pub fn column_for_path(&self, entity: &str, path: &ColumnPath) -> StoreResult<Arc<EntitySchema>> {
        let mut schema = self.schema(entity)?;
        for name in path.relationships() {
            let relationship = schema
                .relationship(name)
                .ok_or_else(|| unknown_relationship(&schema, name))?;
            let target = relationship.target.clone();
            schema = self.schema(&target)?;
        }
        if !schema.has_column(path.column()) {
            return Err(StoreError::InvalidPath(format!(
                "{} has no column `{}`",
                schema.name,
                path.column()
            )));
        }
        Ok(schema)
    }

    fn walk(&self, handle: &RecordHandle, path: &ColumnPath) -> StoreResult<Option<RecordHandle>> {
        let mut current = Rc::clone(handle);
        for name in path.relationships() {
            match self.related_one(&current, name)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn relationship_of(
        &self,
        handle: &RecordHandle,
        name: &str,
        cardinality: Cardinality,
    ) -> StoreResult<(Relationship, Value)> {
        let record = handle.borrow();
        let relationship = record
            .schema()
            .relationship(name)
            .cloned()
            .ok_or_else(|| unknown_relationship(record.schema(), name))?;
        if relationship.cardinality != cardinality {
            return Err(StoreError::InvalidPath(format!(
                "relationship `{name}` of {} is {:?}, not {cardinality:?}",
                record.entity(),
                relationship.cardinality
            )));
        }
        let local = record.get(&relationship.local_column);
        Ok((relationship, local))
    }
}

fn unknown_relationship(schema: &EntitySchema, name: &str) -> StoreError {
    StoreError::Config(ConfigError::UnknownRelationship {
        entity: schema.name.clone(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::ColumnPath;
    use crate::error::StoreError;

    #[test]
    fn parses_relationships_and_final_column() {
        let path = ColumnPath::parse("Company.Category.CategoryName").expect("valid path");
        assert_eq!(path.relationships(), ["Company", "Category"]);
        assert_eq!(path.column(), "CategoryName");
        assert_eq!(path.to_string(), "Company.Category.CategoryName");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            ColumnPath::parse("Company..Name"),
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(ColumnPath::parse(""), Err(StoreError::InvalidPath(_))));
    }
}
