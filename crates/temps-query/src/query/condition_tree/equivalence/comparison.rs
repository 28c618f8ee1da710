use serde_json::Value;

use super::{any_type, string_type, Alternative};
use crate::error::Result;
use crate::query::condition_tree::{ConditionTree, ConditionTreeLeaf};
use crate::query::context::EvalContext;
use crate::query::operator::Operator::{self, *};
use crate::types::ColumnType;

// Empty strings are blank, so null checks alone only cover other types
fn non_string_type(column_type: &ColumnType) -> bool {
    !string_type(column_type)
}

fn blank_to_in(leaf: &ConditionTreeLeaf, _: &ColumnType, _: &EvalContext) -> Result<ConditionTree> {
    Ok(leaf
        .with_operator(In, Value::Array(vec![Value::Null, Value::from("")]))
        .into())
}

fn blank_to_missing(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf.with_operator(Missing, None).into())
}

fn missing_to_equal(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf.with_operator(Equal, Value::Null).into())
}

fn present_to_not_in(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf
        .with_operator(NotIn, Value::Array(vec![Value::Null, Value::from("")]))
        .into())
}

fn present_to_not_equal(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf.with_operator(NotEqual, Value::Null).into())
}

fn equal_to_in(leaf: &ConditionTreeLeaf, _: &ColumnType, _: &EvalContext) -> Result<ConditionTree> {
    let value = leaf.value.clone().unwrap_or(Value::Null);
    Ok(leaf.with_operator(In, Value::Array(vec![value])).into())
}

fn in_to_equal(leaf: &ConditionTreeLeaf, _: &ColumnType, _: &EvalContext) -> Result<ConditionTree> {
    Ok(ConditionTree::or(
        leaf.values()
            .into_iter()
            .map(|value| leaf.with_operator(Equal, value).into())
            .collect(),
    ))
}

fn not_equal_to_not_in(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    let value = leaf.value.clone().unwrap_or(Value::Null);
    Ok(leaf.with_operator(NotIn, Value::Array(vec![value])).into())
}

fn not_in_to_not_equal(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(ConditionTree::and(
        leaf.values()
            .into_iter()
            .map(|value| leaf.with_operator(NotEqual, value).into())
            .collect(),
    ))
}

fn less_than_or_equal(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(ConditionTree::or(vec![
        leaf.with_operator(LessThan, leaf.value.clone()).into(),
        leaf.with_operator(Equal, leaf.value.clone()).into(),
    ]))
}

fn greater_than_or_equal(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(ConditionTree::or(vec![
        leaf.with_operator(GreaterThan, leaf.value.clone()).into(),
        leaf.with_operator(Equal, leaf.value.clone()).into(),
    ]))
}

fn before_to_less_than(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf.with_operator(LessThan, leaf.value.clone()).into())
}

fn after_to_greater_than(
    leaf: &ConditionTreeLeaf,
    _: &ColumnType,
    _: &EvalContext,
) -> Result<ConditionTree> {
    Ok(leaf.with_operator(GreaterThan, leaf.value.clone()).into())
}

static BLANK: [Alternative; 2] = [
    Alternative {
        depends_on: &[In],
        applies_to: string_type,
        replacer: blank_to_in,
    },
    Alternative {
        depends_on: &[Missing],
        applies_to: non_string_type,
        replacer: blank_to_missing,
    },
];

static MISSING: [Alternative; 1] = [Alternative {
    depends_on: &[Equal],
    applies_to: any_type,
    replacer: missing_to_equal,
}];

static PRESENT: [Alternative; 2] = [
    Alternative {
        depends_on: &[NotIn],
        applies_to: string_type,
        replacer: present_to_not_in,
    },
    Alternative {
        depends_on: &[NotEqual],
        applies_to: non_string_type,
        replacer: present_to_not_equal,
    },
];

static EQUAL: [Alternative; 1] = [Alternative {
    depends_on: &[In],
    applies_to: any_type,
    replacer: equal_to_in,
}];

static IN: [Alternative; 1] = [Alternative {
    depends_on: &[Equal],
    applies_to: any_type,
    replacer: in_to_equal,
}];

static NOT_EQUAL: [Alternative; 1] = [Alternative {
    depends_on: &[NotIn],
    applies_to: any_type,
    replacer: not_equal_to_not_in,
}];

static NOT_IN: [Alternative; 1] = [Alternative {
    depends_on: &[NotEqual],
    applies_to: any_type,
    replacer: not_in_to_not_equal,
}];

static LESS_THAN_OR_EQUAL: [Alternative; 1] = [Alternative {
    depends_on: &[LessThan, Equal],
    applies_to: any_type,
    replacer: less_than_or_equal,
}];

static GREATER_THAN_OR_EQUAL: [Alternative; 1] = [Alternative {
    depends_on: &[GreaterThan, Equal],
    applies_to: any_type,
    replacer: greater_than_or_equal,
}];

static BEFORE: [Alternative; 1] = [Alternative {
    depends_on: &[LessThan],
    applies_to: any_type,
    replacer: before_to_less_than,
}];

static AFTER: [Alternative; 1] = [Alternative {
    depends_on: &[GreaterThan],
    applies_to: any_type,
    replacer: after_to_greater_than,
}];

pub(super) fn alternatives(operator: Operator) -> &'static [Alternative] {
    match operator {
        Blank => &BLANK,
        Missing => &MISSING,
        Present => &PRESENT,
        Equal => &EQUAL,
        In => &IN,
        NotEqual => &NOT_EQUAL,
        NotIn => &NOT_IN,
        LessThanOrEqual => &LESS_THAN_OR_EQUAL,
        GreaterThanOrEqual => &GREATER_THAN_OR_EQUAL,
        Before => &BEFORE,
        After => &AFTER,
        _ => &[],
    }
}
