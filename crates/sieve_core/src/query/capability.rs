//! Native capability sets reported by repositories.
//!
//! A capability set lists which `(operator, column)` pairs a backend can
//! filter on and which columns it can order by. Collections compare their
//! query against it to decide what must run in memory.

use crate::schema::EntitySchema;
use std::collections::BTreeSet;

/// Operator family of a leaf predicate, without operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperatorKind {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    OneOf,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 5] = [
        Self::Equals,
        Self::GreaterThan,
        Self::LessThan,
        Self::Contains,
        Self::OneOf,
    ];
}

/// What a backend can evaluate without help from the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    filters: BTreeSet<(OperatorKind, String)>,
    sortable: BTreeSet<String>,
}

impl Capabilities {
    /// Empty capability set: everything falls back to memory.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every operator on every native column, ordering on every native column.
    pub fn all_native(schema: &EntitySchema) -> Self {
        let mut capabilities = Self::none();
        let columns = std::iter::once(schema.identifier_column())
            .chain(schema.native_columns().map(|column| column.name.as_str()));
        for column in columns {
            for operator in OperatorKind::ALL {
                capabilities.allow_filter(operator, column);
            }
            capabilities.allow_sort(column);
        }
        capabilities
    }

    pub fn allow_filter(&mut self, operator: OperatorKind, column: impl Into<String>) {
        self.filters.insert((operator, column.into()));
    }

    pub fn allow_sort(&mut self, column: impl Into<String>) {
        self.sortable.insert(column.into());
    }

    pub fn supports_filter(&self, operator: OperatorKind, column: &str) -> bool {
        self.filters.contains(&(operator, column.to_string()))
    }

    pub fn supports_sort(&self, column: &str) -> bool {
        self.sortable.contains(column)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.sortable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, OperatorKind};
    use crate::model::value::Value;
    use crate::schema::{ColumnDef, ColumnKind, EntitySchema, IdentifierKind};

    #[test]
    fn all_native_excludes_computed_columns() {
        let schema = EntitySchema::builder("Company", "tblCompany")
            .identifier("CompanyID", IdentifierKind::AutoIncrement)
            .column(ColumnDef::text("CompanyName"))
            .column(ColumnDef::computed("Upper", ColumnKind::Text, |_| Value::Null))
            .build()
            .expect("valid schema");

        let capabilities = Capabilities::all_native(&schema);
        assert!(capabilities.supports_filter(OperatorKind::Contains, "CompanyName"));
        assert!(capabilities.supports_filter(OperatorKind::Equals, "CompanyID"));
        assert!(capabilities.supports_sort("CompanyID"));
        assert!(!capabilities.supports_filter(OperatorKind::Equals, "Upper"));
        assert!(!capabilities.supports_sort("Upper"));
        assert!(Capabilities::none().is_empty());
    }
}
