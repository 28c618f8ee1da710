use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{DataError, Result};
use crate::query::projection::Projection;
use crate::record::{compare_for_sort, get_value, split_path, PATH_SEPARATOR};
use crate::types::RecordData;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    pub ascending: bool,
}

impl SortClause {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Ordered list of sort clauses. Earlier clauses take precedence, nulls
/// always sort last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort(Vec<SortClause>);

impl Sort {
    pub fn new(clauses: Vec<SortClause>) -> Self {
        Self(clauses)
    }

    pub fn clauses(&self) -> &[SortClause] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn projection(&self) -> Projection {
        Projection::new(self.0.iter().map(|clause| clause.field.clone()))
    }

    pub fn nest(&self, prefix: &str) -> Sort {
        Sort(
            self.0
                .iter()
                .map(|clause| SortClause {
                    field: format!("{}{}{}", prefix, PATH_SEPARATOR, clause.field),
                    ascending: clause.ascending,
                })
                .collect(),
        )
    }

    pub fn unnest(&self) -> Result<Sort> {
        let Some(first) = self.0.first() else {
            return Ok(self.clone());
        };

        let (prefix, rest) = split_path(&first.field);
        if rest.is_none() {
            return Err(DataError::validation("Cannot unnest sort"));
        }

        let nested_prefix = format!("{}{}", prefix, PATH_SEPARATOR);
        self.0
            .iter()
            .map(|clause| match clause.field.strip_prefix(&nested_prefix) {
                Some(field) => Ok(SortClause {
                    field: field.to_string(),
                    ascending: clause.ascending,
                }),
                None => Err(DataError::validation("Cannot unnest sort")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Sort)
    }

    /// Same clauses with every direction flipped
    pub fn inverse(&self) -> Sort {
        Sort(
            self.0
                .iter()
                .map(|clause| SortClause {
                    field: clause.field.clone(),
                    ascending: !clause.ascending,
                })
                .collect(),
        )
    }

    /// Replace each clause by the clauses returned by `handler`
    pub fn replace_clauses<F>(&self, mut handler: F) -> Sort
    where
        F: FnMut(&SortClause) -> Vec<SortClause>,
    {
        Sort(self.0.iter().flat_map(|clause| handler(clause)).collect())
    }

    /// Compare two records according to the clauses
    pub fn compare(&self, left: &RecordData, right: &RecordData) -> Ordering {
        for clause in &self.0 {
            let ordering = compare_for_sort(
                &get_value(left, &clause.field),
                &get_value(right, &clause.field),
                clause.ascending,
            );
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable in-memory sort
    pub fn apply(&self, mut records: Vec<RecordData>) -> Vec<RecordData> {
        if !self.is_empty() {
            records.sort_by(|a, b| self.compare(a, b));
        }
        records
    }
}

impl From<Vec<SortClause>> for Sort {
    fn from(clauses: Vec<SortClause>) -> Self {
        Sort(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn records(values: Value) -> Vec<RecordData> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn ids(records: &[RecordData]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_apply_multiple_clauses() {
        let sort = Sort::new(vec![SortClause::ascending("name"), SortClause::descending("age")]);
        let sorted = sort.apply(records(json!([
            {"id": 1, "name": "b", "age": 1},
            {"id": 2, "name": "a", "age": 1},
            {"id": 3, "name": "a", "age": 2},
        ])));
        assert_eq!(ids(&sorted), vec![3, 2, 1]);
    }

    #[test]
    fn test_nulls_last_both_directions() {
        let data = records(json!([{"id": 1, "n": null}, {"id": 2, "n": 1}, {"id": 3, "n": 2}]));

        let asc = Sort::new(vec![SortClause::ascending("n")]).apply(data.clone());
        assert_eq!(ids(&asc), vec![2, 3, 1]);

        let desc = Sort::new(vec![SortClause::descending("n")]).apply(data);
        assert_eq!(ids(&desc), vec![3, 2, 1]);
    }

    #[test]
    fn test_stable_for_equal_keys() {
        let sort = Sort::new(vec![SortClause::ascending("n")]);
        let sorted = sort.apply(records(json!([
            {"id": 1, "n": 1},
            {"id": 2, "n": 0},
            {"id": 3, "n": 1},
        ])));
        assert_eq!(ids(&sorted), vec![2, 1, 3]);
    }

    #[test]
    fn test_nest_unnest_inverse() {
        let sort = Sort::new(vec![SortClause::ascending("name")]);
        let nested = sort.nest("author");
        assert_eq!(nested.clauses()[0].field, "author:name");
        assert_eq!(nested.unnest().unwrap(), sort);
        assert!(!sort.inverse().clauses()[0].ascending);
        assert!(sort.unnest().is_err());
    }

    #[test]
    fn test_sort_by_relation_field() {
        let sort = Sort::new(vec![SortClause::ascending("author:name")]);
        let sorted = sort.apply(records(json!([
            {"id": 1, "author": {"name": "b"}},
            {"id": 2, "author": null},
            {"id": 3, "author": {"name": "a"}},
        ])));
        assert_eq!(ids(&sorted), vec![3, 1, 2]);
    }
}
