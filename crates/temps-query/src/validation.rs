//! Checks run on requests before they reach a collection.
//!
//! Every check returns [`DataError::Validation`] describing the first
//! problem found.

use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DataError, Result};
use crate::query::aggregation::{Aggregation, AggregationOperation};
use crate::query::condition_tree::ConditionTree;
use crate::query::operator::Operator;
use crate::query::projection::Projection;
use crate::query::sort::Sort;
use crate::record::as_datetime;
use crate::registry::Datasource;
use crate::schema::{CollectionSchema, ColumnSchema, FieldSchema};
use crate::types::{ColumnType, RecordData};
use crate::utils::resolve_column;

fn matches_type(column: &ColumnSchema, value: &Value) -> bool {
    match (&column.column_type, value) {
        (_, Value::Null) => true,
        (ColumnType::Boolean, Value::Bool(_)) => true,
        (ColumnType::Number, Value::Number(_)) => true,
        (ColumnType::String, Value::String(_)) => true,
        (ColumnType::Time, Value::String(_)) => true,
        (ColumnType::Binary, Value::String(_)) => true,
        (ColumnType::Enum, Value::String(s)) => {
            column.enum_values.is_empty() || column.enum_values.contains(s)
        }
        (ColumnType::Uuid, Value::String(s)) => Uuid::parse_str(s).is_ok(),
        (ColumnType::Date, Value::String(_)) => as_datetime(value).is_some(),
        (ColumnType::Dateonly, Value::String(s)) => {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || as_datetime(value).is_some()
        }
        (ColumnType::Json, _) => true,
        (ColumnType::Point, Value::Array(items)) => {
            items.len() == 2 && items.iter().all(Value::is_number)
        }
        (ColumnType::Array(inner), Value::Array(items)) => {
            let inner = ColumnSchema::new((**inner).clone());
            items.iter().all(|item| matches_type(&inner, item))
        }
        _ => false,
    }
}

/// Check that a value written to or compared with a column has the column's type
pub fn validate_value(field: &str, column: &ColumnSchema, value: &Value) -> Result<()> {
    if matches_type(column, value) {
        Ok(())
    } else {
        Err(DataError::validation(format!(
            "Wrong type for '{}': {} is not a valid {}",
            field, value, column.column_type
        )))
    }
}

/// Check the value of a leaf against its operator and the column type
pub fn validate_leaf_value(
    field: &str,
    column: &ColumnSchema,
    operator: Operator,
    value: Option<&Value>,
) -> Result<()> {
    use Operator::*;

    let value = value.unwrap_or(&Value::Null);
    let invalid = |expected: &str| {
        Err(DataError::validation(format!(
            "Operator '{}' on '{}' expects {}, got {}",
            operator, field, expected, value
        )))
    };

    if operator.is_unary() {
        return if value.is_null() { Ok(()) } else { invalid("no value") };
    }

    match operator {
        In | NotIn => match value {
            Value::Array(items) => items
                .iter()
                .try_for_each(|item| validate_value(field, column, item)),
            _ => invalid("a list"),
        },
        IncludesAll | IncludesNone => match (value, &column.column_type) {
            (Value::Array(items), ColumnType::Array(inner)) => {
                let inner = ColumnSchema::new((**inner).clone());
                items
                    .iter()
                    .try_for_each(|item| validate_value(field, &inner, item))
            }
            (Value::Array(_), _) => Ok(()),
            _ => invalid("a list"),
        },
        LongerThan | ShorterThan | AfterXHoursAgo | BeforeXHoursAgo | PreviousXDays
        | PreviousXDaysToDate => match value {
            Value::Number(_) => Ok(()),
            _ => invalid("a number"),
        },
        Like | ILike | Match | Contains | NotContains | IContains | NotIContains | StartsWith
        | IStartsWith | EndsWith | IEndsWith => match value {
            Value::String(_) => Ok(()),
            _ => invalid("a string"),
        },
        _ => validate_value(field, column, value),
    }
}

/// Check every field of a projection exists
pub fn validate_projection(
    datasource: Option<&Datasource>,
    schema: &CollectionSchema,
    projection: &Projection,
) -> Result<()> {
    for field in projection.iter() {
        resolve_column(datasource, schema, field)?;
    }
    Ok(())
}

/// Check fields, operators and values of a condition tree.
///
/// Operators are checked against the `filter_operators` of each column.
pub fn validate_condition_tree(
    datasource: Option<&Datasource>,
    schema: &CollectionSchema,
    tree: &ConditionTree,
) -> Result<()> {
    for leaf in tree.leaves() {
        let resolved = resolve_column(datasource, schema, &leaf.field)?;
        if !resolved.column.filter_operators.contains(&leaf.operator) {
            return Err(DataError::validation(format!(
                "Operator '{}' is not supported on '{}'",
                leaf.operator, leaf.field
            )));
        }
        validate_leaf_value(&leaf.field, resolved.column, leaf.operator, leaf.value.as_ref())?;
    }
    Ok(())
}

/// Check every sorted field exists and is sortable
pub fn validate_sort(
    datasource: Option<&Datasource>,
    schema: &CollectionSchema,
    sort: &Sort,
) -> Result<()> {
    for clause in sort.clauses() {
        let resolved = resolve_column(datasource, schema, &clause.field)?;
        if !resolved.column.is_sortable {
            return Err(DataError::validation(format!(
                "Field '{}' is not sortable",
                clause.field
            )));
        }
    }
    Ok(())
}

/// Check fields of an aggregation and their types
pub fn validate_aggregation(
    datasource: Option<&Datasource>,
    schema: &CollectionSchema,
    aggregation: &Aggregation,
) -> Result<()> {
    if let Some(field) = &aggregation.field {
        let resolved = resolve_column(datasource, schema, field)?;
        let numeric = matches!(
            aggregation.operation,
            AggregationOperation::Sum | AggregationOperation::Avg
        );
        if numeric && resolved.column.column_type != ColumnType::Number {
            return Err(DataError::validation(format!(
                "{} requires a number field, '{}' is {}",
                aggregation.operation, field, resolved.column.column_type
            )));
        }
    } else if aggregation.operation != AggregationOperation::Count {
        return Err(DataError::validation(format!(
            "{} requires a field",
            aggregation.operation
        )));
    }

    for group in &aggregation.groups {
        let resolved = resolve_column(datasource, schema, &group.field)?;
        if group.operation.is_some() && !resolved.column.column_type.is_date() {
            return Err(DataError::validation(format!(
                "Date grouping requires a date field, '{}' is {}",
                group.field, resolved.column.column_type
            )));
        }
    }

    Ok(())
}

/// Check a patch only writes existing, writable columns with valid values
pub fn validate_patch(schema: &CollectionSchema, patch: &RecordData) -> Result<()> {
    for (field, value) in patch {
        let column = schema.column(field)?;
        if column.is_read_only {
            return Err(DataError::validation(format!("Field '{}' is read-only", field)));
        }
        validate_value(field, column, value)?;
    }
    Ok(())
}

/// Check records to create. Relations may carry nested objects, which are
/// not validated here.
pub fn validate_records(schema: &CollectionSchema, records: &[RecordData]) -> Result<()> {
    for record in records {
        for (field, value) in record {
            match schema.field(field) {
                Some(FieldSchema::Column(column)) => validate_value(field, column, value)?,
                Some(FieldSchema::Relation(_)) => {}
                None => {
                    return Err(DataError::validation(format!("Unknown field '{}'", field)));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::aggregation::{AggregationGroup, DateOperation};
    use crate::query::condition_tree::ConditionTreeLeaf;
    use crate::query::sort::SortClause;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::new()
            .with_field(
                "id",
                ColumnSchema::new(ColumnType::Uuid)
                    .primary_key()
                    .read_only()
                    .with_operators([Operator::Equal, Operator::In]),
            )
            .with_field(
                "age",
                ColumnSchema::new(ColumnType::Number)
                    .sortable()
                    .with_operators([Operator::GreaterThan]),
            )
            .with_field(
                "status",
                ColumnSchema::new(ColumnType::Enum).with_enum_values(&["draft", "live"]),
            )
            .with_field("createdAt", ColumnSchema::new(ColumnType::Date))
    }

    fn accepts(field: &str, operator: Operator, value: Value) -> bool {
        let tree: ConditionTree = ConditionTreeLeaf::new(field, operator, value).into();
        validate_condition_tree(None, &schema(), &tree).is_ok()
    }

    fn sortable(field: &str) -> bool {
        validate_sort(None, &schema(), &Sort::new(vec![SortClause::ascending(field)])).is_ok()
    }

    #[test]
    fn test_condition_tree_operators() {
        assert!(accepts("age", Operator::GreaterThan, json!(3)));
        assert!(!accepts("age", Operator::LessThan, json!(3)));
        assert!(!accepts("name", Operator::Equal, json!(3)));
    }

    #[test]
    fn test_condition_tree_values() {
        assert!(!accepts("age", Operator::GreaterThan, json!("3")));
        assert!(!accepts("id", Operator::In, json!("x")));
        assert!(accepts(
            "id",
            Operator::Equal,
            json!("8f14e45f-ceea-467a-9575-6e1b2f3c4d5e")
        ));
        assert!(!accepts("id", Operator::Equal, json!("nope")));
    }

    #[test]
    fn test_sort_requires_sortable() {
        assert!(sortable("age"));
        assert!(!sortable("status"));
    }

    #[test]
    fn test_aggregation_types() {
        let schema = schema();
        let sum_status = Aggregation::new(AggregationOperation::Sum, Some("status".into()));
        assert!(validate_aggregation(None, &schema, &sum_status).is_err());

        let by_month = Aggregation::count()
            .with_group(AggregationGroup::by_date("createdAt", DateOperation::Month));
        assert!(validate_aggregation(None, &schema, &by_month).is_ok());

        let by_age_month =
            Aggregation::count().with_group(AggregationGroup::by_date("age", DateOperation::Month));
        assert!(validate_aggregation(None, &schema, &by_age_month).is_err());

        let max_without_field = Aggregation::new(AggregationOperation::Max, None);
        assert!(validate_aggregation(None, &schema, &max_without_field).is_err());
    }

    #[test]
    fn test_patch() {
        let schema = schema();
        let ok = json!({"status": "live", "age": null}).as_object().cloned().unwrap();
        assert!(validate_patch(&schema, &ok).is_ok());

        let read_only = json!({"id": "8f14e45f-ceea-467a-9575-6e1b2f3c4d5e"})
            .as_object()
            .cloned()
            .unwrap();
        assert!(validate_patch(&schema, &read_only).is_err());

        let bad_enum = json!({"status": "archived"}).as_object().cloned().unwrap();
        assert!(validate_patch(&schema, &bad_enum).is_err());
    }

    #[test]
    fn test_records() {
        let schema = schema();
        let records = vec![json!({"age": 3, "unknown": 1}).as_object().cloned().unwrap()];
        assert!(validate_records(&schema, &records).is_err());
    }
}
