//! Consistency checks run before a record is persisted.
//!
//! Checks are supplied by the hosting application. Every registered check runs
//! and all failures are collected into one `ValidationErrors` map before the
//! caller sees a single `ModelConsistency` error.

use crate::model::record::Record;
use std::collections::BTreeMap;

/// Field name to failure description.
pub type ValidationErrors = BTreeMap<String, String>;

/// External consistency rule for one entity type.
pub trait ConsistencyCheck {
    /// Records failures into `errors`; must not stop other checks from running.
    fn check(&self, record: &Record, errors: &mut ValidationErrors);
}

/// Requires a column to hold a value (non-empty, non-zero, non-null).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasValue {
    pub column: String,
    pub message: String,
}

impl HasValue {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        let message = format!("{column} must have a value");
        Self { column, message }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl ConsistencyCheck for HasValue {
    fn check(&self, record: &Record, errors: &mut ValidationErrors) {
        if !record.get(&self.column).has_value() {
            errors
                .entry(self.column.clone())
                .or_insert_with(|| self.message.clone());
        }
    }
}

impl<F> ConsistencyCheck for F
where
    F: Fn(&Record, &mut ValidationErrors),
{
    fn check(&self, record: &Record, errors: &mut ValidationErrors) {
        self(record, errors)
    }
}
