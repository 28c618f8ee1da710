use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::equivalence::{pattern, time};
use super::ConditionTree;
use crate::error::{DataError, Result};
use crate::query::context::EvalContext;
use crate::query::operator::Operator;
use crate::record::{compare_values, get_value, values_equal};
use crate::types::{ColumnType, RecordData};

/// Predicate on a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTreeLeaf {
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ConditionTreeLeaf {
    pub fn new(
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Same field, different operator and value
    pub fn with_operator(&self, operator: Operator, value: impl Into<Option<Value>>) -> Self {
        Self::new(self.field.clone(), operator, value)
    }

    /// Same operator and value, different field
    pub fn with_field(&self, field: impl Into<String>) -> Self {
        Self::new(field, self.operator, self.value.clone())
    }

    /// The value as a list: arrays are returned as-is, scalars are wrapped
    pub fn values(&self) -> Vec<Value> {
        match &self.value {
            Some(Value::Array(values)) => values.clone(),
            Some(value) => vec![value.clone()],
            None => Vec::new(),
        }
    }

    pub fn inverse(&self) -> Result<ConditionTree> {
        match self.operator.inverse() {
            Some(operator) => Ok(self.with_operator(operator, self.value.clone()).into()),
            None => Err(DataError::validation(format!(
                "Operator '{}' cannot be inverted",
                self.operator
            ))),
        }
    }

    fn number_value(&self) -> Result<f64> {
        self.value
            .as_ref()
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                DataError::validation(format!(
                    "Operator '{}' on '{}' expects a number",
                    self.operator, self.field
                ))
            })
    }

    /// Evaluate this predicate against a record
    pub fn matches(&self, record: &RecordData, ctx: &EvalContext) -> Result<bool> {
        use Operator::*;

        let actual = get_value(record, &self.field);
        let expected = self.value.clone().unwrap_or(Value::Null);
        let ordering = || compare_values(&actual, &expected);

        let matched = match self.operator {
            Present => !is_blank(&actual),
            Blank => is_blank(&actual),
            Missing => actual.is_null(),
            Equal => values_equal(&actual, &expected),
            NotEqual => !values_equal(&actual, &expected),
            In => self.values().iter().any(|v| values_equal(&actual, v)),
            NotIn => !self.values().iter().any(|v| values_equal(&actual, v)),
            LessThan | Before => ordering() == Some(Ordering::Less),
            GreaterThan | After => ordering() == Some(Ordering::Greater),
            LessThanOrEqual => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            GreaterThanOrEqual => {
                matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))
            }
            Match => match &actual {
                Value::String(s) => compile_regex(&pattern::text(&expected))?.is_match(s),
                _ => false,
            },
            Like | ILike | Contains | IContains | StartsWith | IStartsWith | EndsWith
            | IEndsWith => {
                let (like, case_sensitive) = pattern::like_pattern(self.operator, &expected);
                like_matches(&actual, &like, case_sensitive)?
            }
            NotContains => {
                let (like, _) = pattern::like_pattern(Contains, &expected);
                !like_matches(&actual, &like, true)?
            }
            NotIContains => {
                let (like, _) = pattern::like_pattern(IContains, &expected);
                !like_matches(&actual, &like, false)?
            }
            LongerThan => match &actual {
                Value::String(s) => (s.chars().count() as f64) > self.number_value()?,
                _ => false,
            },
            ShorterThan => match &actual {
                Value::String(s) => (s.chars().count() as f64) < self.number_value()?,
                _ => false,
            },
            IncludesAll => match &actual {
                Value::Array(items) => self
                    .values()
                    .iter()
                    .all(|v| items.iter().any(|item| values_equal(item, v))),
                _ => false,
            },
            IncludesNone => match &actual {
                Value::Array(items) => !self
                    .values()
                    .iter()
                    .any(|v| items.iter().any(|item| values_equal(item, v))),
                _ => true,
            },
            _ => {
                let column_type = infer_date_type(&actual);
                time::expand(self, &column_type, ctx)?.matches(record, ctx)?
            }
        };

        Ok(matched)
    }
}

impl From<ConditionTreeLeaf> for ConditionTree {
    fn from(leaf: ConditionTreeLeaf) -> Self {
        ConditionTree::Leaf(leaf)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn infer_date_type(value: &Value) -> ColumnType {
    match value {
        Value::String(s) if s.len() == 10 => ColumnType::Dateonly,
        _ => ColumnType::Date,
    }
}

pub(crate) fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| DataError::validation(format!("Invalid pattern '{}': {}", pattern, e)))
}

fn like_matches(actual: &Value, like: &str, case_sensitive: bool) -> Result<bool> {
    match actual {
        Value::String(s) => {
            let regex = compile_regex(&pattern::like_to_regex(like, case_sensitive))?;
            Ok(regex.is_match(s))
        }
        _ => Ok(false),
    }
}
