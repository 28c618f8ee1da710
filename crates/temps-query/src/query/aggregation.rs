use chrono::{Datelike, Days, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{DataError, Result};
use crate::query::projection::Projection;
use crate::record::{
    as_datetime, compare_for_sort, compare_values, get_value, number_value, split_path,
    value_key, PATH_SEPARATOR,
};
use crate::types::RecordData;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AggregationOperation {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl fmt::Display for AggregationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Calendar bucket applied to a date group
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum DateOperation {
    Year,
    Quarter,
    Month,
    Week,
    Day,
}

impl DateOperation {
    /// First day of the bucket containing `date`
    pub fn bucket(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            DateOperation::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
            DateOperation::Quarter => {
                NaiveDate::from_ymd_opt(date.year(), (date.month0() / 3) * 3 + 1, 1)
            }
            DateOperation::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
            DateOperation::Week => date.checked_sub_days(Days::new(
                date.weekday().num_days_from_monday() as u64,
            )),
            DateOperation::Day => Some(date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationGroup {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<DateOperation>,
}

impl AggregationGroup {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operation: None,
        }
    }

    pub fn by_date(field: impl Into<String>, operation: DateOperation) -> Self {
        Self {
            field: field.into(),
            operation: Some(operation),
        }
    }
}

/// Aggregate request: an operation over an optional field, optionally grouped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub operation: AggregationOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub groups: Vec<AggregationGroup>,
}

/// One row of an aggregate result. `group` maps each group field to its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub value: Value,
    pub group: RecordData,
}

impl Aggregation {
    pub fn new(operation: AggregationOperation, field: Option<String>) -> Self {
        Self {
            operation,
            field,
            groups: Vec::new(),
        }
    }

    pub fn count() -> Self {
        Self::new(AggregationOperation::Count, None)
    }

    pub fn with_group(mut self, group: AggregationGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Fields read by the aggregation
    pub fn projection(&self) -> Projection {
        Projection::new(
            self.field
                .iter()
                .cloned()
                .chain(self.groups.iter().map(|group| group.field.clone())),
        )
    }

    /// Rename every field the aggregation reads
    pub fn replace_fields<F>(&self, mut handler: F) -> Aggregation
    where
        F: FnMut(&str) -> String,
    {
        Aggregation {
            operation: self.operation,
            field: self.field.as_deref().map(&mut handler),
            groups: self
                .groups
                .iter()
                .map(|group| AggregationGroup {
                    field: handler(&group.field),
                    operation: group.operation,
                })
                .collect(),
        }
    }

    pub fn nest(&self, prefix: &str) -> Aggregation {
        self.replace_fields(|field| format!("{}{}{}", prefix, PATH_SEPARATOR, field))
    }

    /// Strip the relation prefix shared by every field
    pub fn unnest(&self) -> Result<Aggregation> {
        let fields = self.projection();
        let Some(first) = fields.iter().next() else {
            return Ok(self.clone());
        };

        let (prefix, _) = split_path(first);
        let nested_prefix = format!("{}{}", prefix, PATH_SEPARATOR);
        if !fields.iter().all(|field| field.starts_with(&nested_prefix)) {
            return Err(DataError::validation("Cannot unnest aggregation"));
        }

        Ok(self.replace_fields(|field| field[nested_prefix.len()..].to_string()))
    }

    fn group_value(group: &AggregationGroup, record: &RecordData, timezone: Tz) -> Value {
        let value = get_value(record, &group.field);
        let Some(operation) = group.operation else {
            return value;
        };

        let date = match &value {
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| as_datetime(&value).map(|d| d.with_timezone(&timezone).date_naive())),
            _ => None,
        };

        date.and_then(|date| operation.bucket(date))
            .map(|bucket| Value::String(bucket.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null)
    }

    fn compute(&self, rows: &[&RecordData]) -> Value {
        let values: Vec<Value> = match &self.field {
            Some(field) => rows
                .iter()
                .map(|row| get_value(row, field))
                .filter(|value| !value.is_null())
                .collect(),
            None => Vec::new(),
        };

        match self.operation {
            AggregationOperation::Count if self.field.is_none() => Value::from(rows.len()),
            AggregationOperation::Count => Value::from(values.len()),
            AggregationOperation::Sum => {
                number_value(values.iter().filter_map(Value::as_f64).sum())
            }
            AggregationOperation::Avg => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            AggregationOperation::Min => values
                .into_iter()
                .reduce(|best, v| match compare_values(&v, &best) {
                    Some(std::cmp::Ordering::Less) => v,
                    _ => best,
                })
                .unwrap_or(Value::Null),
            AggregationOperation::Max => values
                .into_iter()
                .reduce(|best, v| match compare_values(&v, &best) {
                    Some(std::cmp::Ordering::Greater) => v,
                    _ => best,
                })
                .unwrap_or(Value::Null),
        }
    }

    /// Aggregate records in memory. Results are sorted by value, descending.
    pub fn apply(
        &self,
        records: &[RecordData],
        timezone: Tz,
        limit: Option<usize>,
    ) -> Vec<AggregateResult> {
        let mut buckets: Vec<(RecordData, Vec<&RecordData>)> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();

        for record in records {
            let mut group = RecordData::new();
            let mut key = Vec::with_capacity(self.groups.len());
            for aggregation_group in &self.groups {
                let value = Self::group_value(aggregation_group, record, timezone);
                key.push(value_key(&value));
                group.insert(aggregation_group.field.clone(), value);
            }

            let position = *index.entry(key).or_insert_with(|| {
                buckets.push((group, Vec::new()));
                buckets.len() - 1
            });
            buckets[position].1.push(record);
        }

        if buckets.is_empty() && self.groups.is_empty() {
            buckets.push((RecordData::new(), Vec::new()));
        }

        let mut results: Vec<AggregateResult> = buckets
            .into_iter()
            .map(|(group, rows)| AggregateResult {
                value: self.compute(&rows),
                group,
            })
            .collect();

        results.sort_by(|a, b| compare_for_sort(&a.value, &b.value, false));
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Value) -> Vec<RecordData> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn group(value: Value) -> RecordData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_count_by_status() {
        let aggregation = Aggregation::count().with_group(AggregationGroup::new("status"));
        let results = aggregation.apply(
            &records(json!([{"status": "a"}, {"status": "a"}, {"status": "b"}])),
            Tz::UTC,
            None,
        );

        assert_eq!(
            results,
            vec![
                AggregateResult {
                    value: json!(2),
                    group: group(json!({"status": "a"}))
                },
                AggregateResult {
                    value: json!(1),
                    group: group(json!({"status": "b"}))
                },
            ]
        );
    }

    #[test]
    fn test_groups_keyed_by_value_tuple() {
        let aggregation = Aggregation::count()
            .with_group(AggregationGroup::new("a"))
            .with_group(AggregationGroup::new("b"));
        let results = aggregation.apply(
            &records(json!([{"a": "x|s:y", "b": "z"}, {"a": "x", "b": "y|s:z"}])),
            Tz::UTC,
            None,
        );

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].group, group(json!({"a": "x|s:y", "b": "z"})));
        assert_eq!(results[1].group, group(json!({"a": "x", "b": "y|s:z"})));
    }

    #[test]
    fn test_empty_input_without_groups() {
        let count = Aggregation::count().apply(&[], Tz::UTC, None);
        assert_eq!(count.len(), 1);
        assert_eq!(count[0].value, json!(0));

        let avg =
            Aggregation::new(AggregationOperation::Avg, Some("n".into())).apply(&[], Tz::UTC, None);
        assert_eq!(avg[0].value, Value::Null);

        let grouped = Aggregation::count()
            .with_group(AggregationGroup::new("status"))
            .apply(&[], Tz::UTC, None);
        assert!(grouped.is_empty());
    }

    #[test]
    fn test_numeric_operations_ignore_nulls() {
        let data = records(json!([{"n": 1}, {"n": null}, {"n": 4}]));

        let sum = Aggregation::new(AggregationOperation::Sum, Some("n".into()));
        assert_eq!(sum.apply(&data, Tz::UTC, None)[0].value, json!(5));

        let avg = Aggregation::new(AggregationOperation::Avg, Some("n".into()));
        assert_eq!(avg.apply(&data, Tz::UTC, None)[0].value, json!(2.5));

        let count = Aggregation::new(AggregationOperation::Count, Some("n".into()));
        assert_eq!(count.apply(&data, Tz::UTC, None)[0].value, json!(2));

        let max = Aggregation::new(AggregationOperation::Max, Some("n".into()));
        assert_eq!(max.apply(&data, Tz::UTC, None)[0].value, json!(4));

        let min = Aggregation::new(AggregationOperation::Min, Some("n".into()));
        assert_eq!(min.apply(&data, Tz::UTC, None)[0].value, json!(1));
    }

    #[test]
    fn test_date_buckets() {
        let data = records(json!([
            {"at": "2024-03-13T10:00:00Z"},
            {"at": "2024-03-17T10:00:00Z"},
            {"at": "2024-03-18T10:00:00Z"},
        ]));

        let by_week = Aggregation::count()
            .with_group(AggregationGroup::by_date("at", DateOperation::Week))
            .apply(&data, Tz::UTC, None);
        assert_eq!(by_week[0].group["at"], json!("2024-03-11"));
        assert_eq!(by_week[0].value, json!(2));
        assert_eq!(by_week[1].group["at"], json!("2024-03-18"));

        let by_quarter = Aggregation::count()
            .with_group(AggregationGroup::by_date("at", DateOperation::Quarter))
            .apply(&data, Tz::UTC, None);
        assert_eq!(by_quarter.len(), 1);
        assert_eq!(by_quarter[0].group["at"], json!("2024-01-01"));
    }

    #[test]
    fn test_date_buckets_use_timezone() {
        let data = records(json!([{"at": "2024-03-31T23:30:00Z"}]));
        let by_month = Aggregation::count()
            .with_group(AggregationGroup::by_date("at", DateOperation::Month))
            .apply(&data, Tz::Europe__Paris, None);
        assert_eq!(by_month[0].group["at"], json!("2024-04-01"));
    }

    #[test]
    fn test_nest_unnest() {
        let aggregation = Aggregation::new(AggregationOperation::Sum, Some("price".into()))
            .with_group(AggregationGroup::new("status"));
        let nested = aggregation.nest("book");
        assert_eq!(nested.field.as_deref(), Some("book:price"));
        assert_eq!(nested.groups[0].field, "book:status");
        assert_eq!(nested.unnest().unwrap(), aggregation);
        assert!(aggregation.unnest().is_err());
    }

    #[test]
    fn test_limit() {
        let data = records(json!([{"s": "a"}, {"s": "b"}, {"s": "b"}, {"s": "c"}]));
        let results = Aggregation::count()
            .with_group(AggregationGroup::new("s"))
            .apply(&data, Tz::UTC, Some(1));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].group["s"], json!("b"));
    }
}
