//! Constructors for common condition trees.

use serde_json::Value;

use super::{Aggregator, ConditionTree, ConditionTreeBranch, ConditionTreeLeaf};
use crate::error::{DataError, Result};
use crate::query::operator::Operator;
use crate::record::get_value;
use crate::schema::CollectionSchema;
use crate::types::{CompositeId, RecordData};

/// Tree matching every record
pub fn match_all() -> ConditionTree {
    ConditionTree::and(Vec::new())
}

/// Tree matching no record
pub fn match_none() -> ConditionTree {
    ConditionTree::or(Vec::new())
}

fn merge(aggregator: Aggregator, trees: Vec<Option<ConditionTree>>) -> Option<ConditionTree> {
    let mut conditions = Vec::new();

    for tree in trees.into_iter().flatten() {
        match tree {
            ConditionTree::Branch(branch) if branch.aggregator == aggregator => {
                conditions.extend(branch.conditions);
            }
            other => conditions.push(other),
        }
    }

    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(
            ConditionTreeBranch {
                aggregator,
                conditions,
            }
            .into(),
        ),
    }
}

/// `And` of the given trees, ignoring absent ones and flattening nested `And`s
pub fn intersect(trees: Vec<Option<ConditionTree>>) -> Option<ConditionTree> {
    let had_trees = trees.iter().any(Option::is_some);
    match merge(Aggregator::And, trees) {
        // And[] nested in And[] flattens to nothing, which still means "everything"
        None if had_trees => Some(match_all()),
        merged => merged,
    }
}

/// `Or` of the given trees, ignoring absent ones and flattening nested `Or`s
pub fn union(trees: Vec<Option<ConditionTree>>) -> Option<ConditionTree> {
    let had_trees = trees.iter().any(Option::is_some);
    match merge(Aggregator::Or, trees) {
        None if had_trees => Some(match_none()),
        merged => merged,
    }
}

/// Tree selecting records by composite id
pub fn match_ids(schema: &CollectionSchema, ids: &[CompositeId]) -> Result<ConditionTree> {
    let primary_keys = schema.primary_keys();
    if primary_keys.is_empty() {
        return Err(DataError::validation("Collection must have at least one primary key"));
    }

    if let Some(id) = ids.iter().find(|id| id.len() != primary_keys.len()) {
        return Err(DataError::validation(format!(
            "Expected {} values in id, got {}",
            primary_keys.len(),
            id.len()
        )));
    }

    if let [primary_key] = primary_keys.as_slice() {
        let values: Vec<Value> = ids.iter().map(|id| id[0].clone()).collect();
        return Ok(ConditionTreeLeaf::new(*primary_key, Operator::In, Value::Array(values)).into());
    }

    Ok(ConditionTree::or(
        ids.iter()
            .map(|id| {
                ConditionTree::and(
                    primary_keys
                        .iter()
                        .zip(id)
                        .map(|(field, value)| {
                            ConditionTreeLeaf::new(*field, Operator::Equal, value.clone()).into()
                        })
                        .collect(),
                )
            })
            .collect(),
    ))
}

/// Composite id of a record
pub fn record_id(schema: &CollectionSchema, record: &RecordData) -> CompositeId {
    schema
        .primary_keys()
        .into_iter()
        .map(|field| get_value(record, field))
        .collect()
}

/// Tree selecting the given records by primary key
pub fn match_records(schema: &CollectionSchema, records: &[RecordData]) -> Result<ConditionTree> {
    let ids: Vec<CompositeId> = records.iter().map(|r| record_id(schema, r)).collect();
    match_ids(schema, &ids)
}
