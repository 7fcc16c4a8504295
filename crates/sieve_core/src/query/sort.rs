//! Sort keys and result windows.

use crate::model::value::{compare_values, Value};
use crate::query::filter::FieldSource;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Ordered list of sort keys; earlier keys take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, ascending: bool) {
        self.keys.push(SortKey {
            column: column.into(),
            ascending,
        });
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Stable multi-key sort of `items` in declared key order.
    pub fn sort_in_memory<T: FieldSource>(&self, items: Vec<T>) -> Vec<T> {
        if self.keys.is_empty() {
            return items;
        }
        let mut keyed: Vec<(Vec<Value>, T)> = items
            .into_iter()
            .map(|item| {
                let values = self.keys.iter().map(|key| item.field(&key.column)).collect();
                (values, item)
            })
            .collect();
        keyed.sort_by(|(left, _), (right, _)| self.compare(left, right));
        keyed.into_iter().map(|(_, item)| item).collect()
    }

    fn compare(&self, left: &[Value], right: &[Value]) -> Ordering {
        for (index, key) in self.keys.iter().enumerate() {
            let ordering = compare_values(&left[index], &right[index]);
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for SortSpec {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        Self {
            keys: iter
                .into_iter()
                .map(|(column, ascending)| SortKey {
                    column: column.into(),
                    ascending,
                })
                .collect(),
        }
    }
}

/// Window over an ordered result: skip `offset`, keep at most `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub offset: usize,
    pub count: usize,
}

impl RangeSpec {
    pub fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.count).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{RangeSpec, SortSpec};
    use crate::model::value::{FieldValues, Value};

    fn row(name: &str, balance: i64) -> FieldValues {
        let mut values = FieldValues::new();
        values.insert("Name".to_string(), Value::from(name));
        values.insert("Balance".to_string(), Value::Int(balance));
        values
    }

    #[test]
    fn sorts_by_keys_in_declared_order() {
        let rows = vec![
            row("A", 5),
            row("B", 3),
            row("B", 4),
            row("B", 2),
            row("C", 2),
            row("D", 1),
        ];
        let spec: SortSpec = [("Name", false), ("Balance", true)].into_iter().collect();
        let sorted: Vec<_> = spec
            .sort_in_memory(rows)
            .into_iter()
            .map(|row| (row["Name"].to_string(), row["Balance"].clone()))
            .collect();
        assert_eq!(
            sorted,
            vec![
                ("D".to_string(), Value::Int(1)),
                ("C".to_string(), Value::Int(2)),
                ("B".to_string(), Value::Int(2)),
                ("B".to_string(), Value::Int(3)),
                ("B".to_string(), Value::Int(4)),
                ("A".to_string(), Value::Int(5)),
            ]
        );
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let spec: SortSpec = [("Name", true)].into_iter().collect();
        let sorted = spec.sort_in_memory(vec![row("B", 1), row("A", 2), row("B", 3)]);
        let balances: Vec<_> = sorted.iter().map(|row| row["Balance"].clone()).collect();
        assert_eq!(balances, vec![Value::Int(2), Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn range_slices_and_tolerates_overflow() {
        assert_eq!(RangeSpec::new(2, 2).apply(vec![1, 2, 3, 4, 5]), vec![3, 4]);
        assert_eq!(RangeSpec::new(4, 10).apply(vec![1, 2, 3, 4, 5]), vec![5]);
        assert!(RangeSpec::new(9, 1).apply(vec![1, 2]).is_empty());
    }
}
