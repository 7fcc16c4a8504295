//! Field values and record identifiers.
//!
//! # Responsibility
//! - Define the dynamically typed value stored in every record field.
//! - Provide one comparison routine shared by in-memory filtering and sorting.
//!
//! # Invariants
//! - Ordering ranks `Null` < numbers (bool/int/float) < text, matching SQLite.
//! - Numbers of different representations compare by numeric value.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Field name to value mapping used for stored and imported data.
pub type FieldValues = BTreeMap<String, Value>;

/// Dynamically typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(value) => Some(i64::from(*value)),
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Text rendering used by substring matching.
    ///
    /// Returns `None` for `Null`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(i64::from(*value).to_string()),
            Self::Int(value) => Some(value.to_string()),
            Self::Float(value) => Some(format!("{value:?}")),
            Self::Text(value) => Some(value.clone()),
        }
    }

    /// Whether this value counts as "set" for consistency checks.
    ///
    /// Null, empty text, zero and `false` have no value.
    pub fn has_value(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Float(value) => *value != 0.0,
            Self::Text(value) => !value.is_empty(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        match value {
            RecordId::Int(id) => Self::Int(id),
            RecordId::Text(id) => Self::Text(id),
        }
    }
}

/// Total order over values used by sorting and range predicates.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (a, b) if a.rank() == 1 && b.rank() == 1 => match (a.as_f64(), b.as_f64()) {
            // NaN falls back to the IEEE total order; signed zeros stay equal.
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b)),
            _ => Ordering::Equal,
        },
        (a, b) => a.rank().cmp(&b.rank()),
    }
}

/// Equality as seen by the `Equals` predicate: `Null` only equals `Null`.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    left.rank() == right.rank() && compare_values(left, right) == Ordering::Equal
}

/// Stable record identifier.
///
/// Auto-increment identifiers are integers; uuid and externally assigned
/// identifiers are text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Zero and empty identifiers never address a stored record.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Int(id) => *id != 0,
            Self::Text(id) => !id.trim().is_empty(),
        }
    }

    /// Converts a field value into an identifier.
    ///
    /// Returns `None` for null, boolean and fractional values.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(id) => Some(Self::Int(*id)),
            Value::Float(id) if id.fract() == 0.0 => Some(Self::Int(*id as i64)),
            Value::Text(id) => Some(Self::Text(id.clone())),
            _ => None,
        }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
