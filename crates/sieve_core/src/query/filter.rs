//! Predicate tree used to describe which records a collection contains.
//!
//! # Responsibility
//! - Represent filters as leaf predicates and AND/OR groups.
//! - Evaluate filters in memory, invert them, and check them against a
//!   repository capability set.
//!
//! # Invariants
//! - Inverting a leaf toggles only its `negated` flag.
//! - Inverting a group swaps AND/OR and inverts every child (De Morgan).
//! - An empty AND group is always true; an empty OR group is always false.
//! - A leaf on a `Null` field is false unless it tests `Equals(Null)`; its
//!   negation is therefore true.

use crate::model::value::{compare_values, values_equal, FieldValues, Value};
use crate::query::capability::{Capabilities, OperatorKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Anything a filter can read column values from.
pub trait FieldSource {
    fn field(&self, column: &str) -> Value;
}

impl FieldSource for FieldValues {
    fn field(&self, column: &str) -> Value {
        self.get(column).cloned().unwrap_or_default()
    }
}

/// Leaf comparison with its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Operator {
    Equals(Value),
    GreaterThan { value: Value, inclusive: bool },
    LessThan { value: Value, inclusive: bool },
    Contains { needle: String, case_sensitive: bool },
    OneOf(Vec<Value>),
}

impl Operator {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Equals(_) => OperatorKind::Equals,
            Self::GreaterThan { .. } => OperatorKind::GreaterThan,
            Self::LessThan { .. } => OperatorKind::LessThan,
            Self::Contains { .. } => OperatorKind::Contains,
            Self::OneOf(_) => OperatorKind::OneOf,
        }
    }

    fn test(&self, field: &Value) -> bool {
        match self {
            Self::Equals(expected) => values_equal(field, expected),
            _ if field.is_null() => false,
            Self::GreaterThan { value, inclusive } => {
                !value.is_null()
                    && match compare_values(field, value) {
                        Ordering::Greater => true,
                        Ordering::Equal => *inclusive,
                        Ordering::Less => false,
                    }
            }
            Self::LessThan { value, inclusive } => {
                !value.is_null()
                    && match compare_values(field, value) {
                        Ordering::Less => true,
                        Ordering::Equal => *inclusive,
                        Ordering::Greater => false,
                    }
            }
            Self::Contains {
                needle,
                case_sensitive,
            } => {
                let Some(haystack) = field.to_text() else {
                    return false;
                };
                if *case_sensitive {
                    haystack.contains(needle.as_str())
                } else {
                    haystack
                        .to_ascii_lowercase()
                        .contains(needle.to_ascii_lowercase().as_str())
                }
            }
            Self::OneOf(candidates) => candidates
                .iter()
                .any(|candidate| values_equal(field, candidate)),
        }
    }
}

/// One column comparison, optionally negated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub negated: bool,
}

/// Boolean connective of a group node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanOp {
    And,
    Or,
}

impl BooleanOp {
    pub fn flipped(self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }
}

/// Predicate tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum FilterNode {
    Leaf(Predicate),
    Group {
        op: BooleanOp,
        children: Vec<FilterNode>,
    },
}

impl Default for FilterNode {
    fn default() -> Self {
        Self::all()
    }
}

impl FilterNode {
    /// Filter matching every record (empty AND group).
    pub fn all() -> Self {
        Self::and(Vec::new())
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::Group {
            op: BooleanOp::And,
            children,
        }
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::Group {
            op: BooleanOp::Or,
            children,
        }
    }

    pub fn leaf(column: impl Into<String>, operator: Operator) -> Self {
        Self::Leaf(Predicate {
            column: column.into(),
            operator,
            negated: false,
        })
    }

    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(column, Operator::Equals(value.into()))
    }

    pub fn greater_than(column: impl Into<String>, value: impl Into<Value>, inclusive: bool) -> Self {
        Self::leaf(
            column,
            Operator::GreaterThan {
                value: value.into(),
                inclusive,
            },
        )
    }

    pub fn less_than(column: impl Into<String>, value: impl Into<Value>, inclusive: bool) -> Self {
        Self::leaf(
            column,
            Operator::LessThan {
                value: value.into(),
                inclusive,
            },
        )
    }

    /// Case-insensitive (ASCII) substring match.
    pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::leaf(
            column,
            Operator::Contains {
                needle: needle.into(),
                case_sensitive: false,
            },
        )
    }

    pub fn contains_case_sensitive(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::leaf(
            column,
            Operator::Contains {
                needle: needle.into(),
                case_sensitive: true,
            },
        )
    }

    pub fn one_of<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::leaf(column, Operator::OneOf(values.into_iter().map(Into::into).collect()))
    }

    /// Inclusive range; expands to `AND(>= min, <= max)`.
    pub fn between(column: impl Into<String>, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        let column = column.into();
        Self::and(vec![
            Self::greater_than(column.clone(), min, true),
            Self::less_than(column, max, true),
        ])
    }

    /// Returns this node negated.
    pub fn not(self) -> Self {
        self.invert()
    }

    /// ANDs `node` onto this filter, extending an existing AND group in place.
    pub fn and_also(self, node: FilterNode) -> Self {
        match self {
            Self::Group {
                op: BooleanOp::And,
                mut children,
            } => {
                children.push(node);
                Self::and(children)
            }
            other => Self::and(vec![other, node]),
        }
    }

    pub fn evaluate<S: FieldSource + ?Sized>(&self, source: &S) -> bool {
        match self {
            Self::Leaf(predicate) => {
                predicate.operator.test(&source.field(&predicate.column)) != predicate.negated
            }
            Self::Group {
                op: BooleanOp::And,
                children,
            } => children.iter().all(|child| child.evaluate(source)),
            Self::Group {
                op: BooleanOp::Or,
                children,
            } => children.iter().any(|child| child.evaluate(source)),
        }
    }

    /// Logical complement of this filter.
    pub fn invert(&self) -> Self {
        match self {
            Self::Leaf(predicate) => Self::Leaf(Predicate {
                negated: !predicate.negated,
                ..predicate.clone()
            }),
            Self::Group { op, children } => Self::Group {
                op: op.flipped(),
                children: children.iter().map(FilterNode::invert).collect(),
            },
        }
    }

    /// Whether a backend with `capabilities` can evaluate this whole tree.
    pub fn natively_supported_by(&self, capabilities: &Capabilities) -> bool {
        match self {
            Self::Leaf(predicate) => {
                capabilities.supports_filter(predicate.operator.kind(), &predicate.column)
            }
            Self::Group { children, .. } => children
                .iter()
                .all(|child| child.natively_supported_by(capabilities)),
        }
    }

    pub fn referenced_columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns(&self, columns: &mut BTreeSet<String>) {
        match self {
            Self::Leaf(predicate) => {
                columns.insert(predicate.column.clone());
            }
            Self::Group { children, .. } => {
                for child in children {
                    child.collect_columns(columns);
                }
            }
        }
    }

    /// True for an empty AND group (matches everything).
    pub fn is_always_true(&self) -> bool {
        matches!(self, Self::Group { op: BooleanOp::And, children } if children.is_empty())
    }

    /// Column values implied by non-negated `Equals` leaves in the top-level
    /// AND list. Used to stamp filter values onto records appended to a
    /// collection.
    pub fn equality_values(&self) -> FieldValues {
        let mut values = FieldValues::new();
        match self {
            Self::Leaf(predicate) => push_equality(predicate, &mut values),
            Self::Group {
                op: BooleanOp::And,
                children,
            } => {
                for child in children {
                    if let Self::Leaf(predicate) = child {
                        push_equality(predicate, &mut values);
                    }
                }
            }
            Self::Group { .. } => {}
        }
        values
    }
}

fn push_equality(predicate: &Predicate, values: &mut FieldValues) {
    if let (Operator::Equals(value), false) = (&predicate.operator, predicate.negated) {
        values.insert(predicate.column.clone(), value.clone());
    }
}
