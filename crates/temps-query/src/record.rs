//! Helpers to read, write and compare values inside records.
//!
//! Paths use `:` to traverse relations (`author:address:city`).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::types::RecordData;

/// Separator used in field paths to traverse relations
pub const PATH_SEPARATOR: char = ':';

/// Split `author:name` into `("author", Some("name"))`
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once(PATH_SEPARATOR) {
        Some((prefix, rest)) => (prefix, Some(rest)),
        None => (path, None),
    }
}

/// Number of relation hops in a path (`a:b:c` has 2)
pub fn path_depth(path: &str) -> usize {
    path.matches(PATH_SEPARATOR).count()
}

/// Read the value at `path`, returning None when any step is missing or null
pub fn get_path<'a>(record: &'a RecordData, path: &str) -> Option<&'a Value> {
    match split_path(path) {
        (field, None) => record.get(field),
        (prefix, Some(rest)) => match record.get(prefix) {
            Some(Value::Object(nested)) => get_path(nested, rest),
            _ => None,
        },
    }
}

/// Read the value at `path`, defaulting to null
pub fn get_value(record: &RecordData, path: &str) -> Value {
    get_path(record, path).cloned().unwrap_or(Value::Null)
}

/// Write `value` at `path`, creating intermediate objects as needed.
/// Intermediate relations that are explicitly null are left untouched.
pub fn set_path(record: &mut RecordData, path: &str, value: Value) {
    match split_path(path) {
        (field, None) => {
            record.insert(field.to_string(), value);
        }
        (prefix, Some(rest)) => {
            let entry = record
                .entry(prefix.to_string())
                .or_insert_with(|| Value::Object(Map::new()));

            if let Value::Object(nested) = entry {
                set_path(nested, rest, value);
            }
        }
    }
}

/// Whether the relation at `prefix` (a path without its last segment) is null
pub fn is_null_relation(record: &RecordData, prefix: &str) -> bool {
    !matches!(get_path(record, prefix), Some(Value::Object(_)))
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// Parse a timestamp or calendar date stored as a string
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_date(s),
        _ => None,
    }
}

/// Order two values. Numbers compare numerically, strings holding dates
/// compare chronologically, other strings lexicographically.
/// Returns None for null or mismatched values.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => match (parse_date(l), parse_date(r)) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => Some(l.cmp(r)),
        },
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Loose equality used by filters: numbers and dates compare by value
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

/// Ordering used to sort records: nulls are always last, whatever the direction
pub fn compare_for_sort(left: &Value, right: &Value, ascending: bool) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = compare_values(left, right).unwrap_or(Ordering::Equal);
            if ascending {
                ordering
            } else {
                ordering.reverse()
            }
        }
    }
}

/// Canonical hashable representation of a value, used to join records by key
pub fn value_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("n:{}", f as i64),
            Some(f) => format!("n:{}", f),
            None => format!("n:{}", n),
        },
        Value::String(s) => format!("s:{}", s),
        other => other.to_string(),
    }
}

/// Render a float as a JSON number, keeping integral values integral
pub fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RecordData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_get_nested_path() {
        let book = record(json!({"title": "Dune", "author": {"name": "Herbert"}}));
        assert_eq!(get_path(&book, "author:name"), Some(&json!("Herbert")));
        assert_eq!(get_path(&book, "author:age"), None);
        assert_eq!(get_value(&book, "publisher:name"), Value::Null);
    }

    #[test]
    fn test_set_nested_path() {
        let mut book = record(json!({"title": "Dune"}));
        set_path(&mut book, "author:name", json!("Herbert"));
        assert_eq!(book["author"], json!({"name": "Herbert"}));

        let mut orphan = record(json!({"author": null}));
        set_path(&mut orphan, "author:name", json!("x"));
        assert_eq!(orphan["author"], Value::Null);
    }

    #[test]
    fn test_compare_dates_across_formats() {
        let left = json!("2024-01-01T00:00:00Z");
        let right = json!("2024-01-01T00:00:00.000Z");
        assert!(values_equal(&left, &right));

        let date = json!("2024-01-02");
        assert_eq!(compare_values(&left, &date), Some(Ordering::Less));
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert_eq!(compare_values(&json!(9), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
    }

    #[test]
    fn test_nulls_sort_last_in_both_directions() {
        assert_eq!(compare_for_sort(&Value::Null, &json!(1), true), Ordering::Greater);
        assert_eq!(compare_for_sort(&Value::Null, &json!(1), false), Ordering::Greater);
        assert_eq!(compare_for_sort(&json!(2), &json!(1), false), Ordering::Less);
    }

    #[test]
    fn test_value_key_normalizes_numbers() {
        assert_eq!(value_key(&json!(1)), value_key(&json!(1.0)));
        assert_ne!(value_key(&json!(1)), value_key(&json!("1")));
    }

    #[test]
    fn test_path_depth() {
        assert_eq!(path_depth("title"), 0);
        assert_eq!(path_depth("author:publisher:name"), 2);
    }
}
