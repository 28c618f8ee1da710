//! Recursive boolean filter expressions.
//!
//! A tree is either a leaf (a predicate on one field) or a branch joining
//! children with `And`/`Or`. An empty `And` matches everything, an empty `Or`
//! matches nothing.

pub mod equivalence;
pub mod factory;
mod leaf;

pub use leaf::ConditionTreeLeaf;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};
use crate::query::context::EvalContext;
use crate::query::projection::Projection;
use crate::record::{split_path, PATH_SEPARATOR};
use crate::types::RecordData;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionTreeBranch {
    pub aggregator: Aggregator,
    pub conditions: Vec<ConditionTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionTree {
    Branch(ConditionTreeBranch),
    Leaf(ConditionTreeLeaf),
}

impl From<ConditionTreeBranch> for ConditionTree {
    fn from(branch: ConditionTreeBranch) -> Self {
        ConditionTree::Branch(branch)
    }
}

impl ConditionTree {
    pub fn and(conditions: Vec<ConditionTree>) -> Self {
        ConditionTreeBranch {
            aggregator: Aggregator::And,
            conditions,
        }
        .into()
    }

    pub fn or(conditions: Vec<ConditionTree>) -> Self {
        ConditionTreeBranch {
            aggregator: Aggregator::Or,
            conditions,
        }
        .into()
    }

    /// Tree matching exactly the records this one rejects
    pub fn inverse(&self) -> Result<ConditionTree> {
        match self {
            ConditionTree::Leaf(leaf) => leaf.inverse(),
            ConditionTree::Branch(branch) => {
                let aggregator = match branch.aggregator {
                    Aggregator::And => Aggregator::Or,
                    Aggregator::Or => Aggregator::And,
                };
                let conditions = branch
                    .conditions
                    .iter()
                    .map(ConditionTree::inverse)
                    .collect::<Result<Vec<_>>>()?;

                Ok(ConditionTreeBranch {
                    aggregator,
                    conditions,
                }
                .into())
            }
        }
    }

    /// Replace every leaf by the tree returned by `handler`
    pub fn replace_leafs<F>(&self, mut handler: F) -> ConditionTree
    where
        F: FnMut(&ConditionTreeLeaf) -> ConditionTree,
    {
        self.replace_leafs_inner(&mut handler)
    }

    fn replace_leafs_inner<F>(&self, handler: &mut F) -> ConditionTree
    where
        F: FnMut(&ConditionTreeLeaf) -> ConditionTree,
    {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => ConditionTreeBranch {
                aggregator: branch.aggregator,
                conditions: branch
                    .conditions
                    .iter()
                    .map(|c| c.replace_leafs_inner(handler))
                    .collect(),
            }
            .into(),
        }
    }

    /// Fallible variant of [`ConditionTree::replace_leafs`]
    pub fn try_replace_leafs<F>(&self, mut handler: F) -> Result<ConditionTree>
    where
        F: FnMut(&ConditionTreeLeaf) -> Result<ConditionTree>,
    {
        self.try_replace_leafs_inner(&mut handler)
    }

    fn try_replace_leafs_inner<F>(&self, handler: &mut F) -> Result<ConditionTree>
    where
        F: FnMut(&ConditionTreeLeaf) -> Result<ConditionTree>,
    {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => {
                let mut conditions = Vec::with_capacity(branch.conditions.len());
                for condition in &branch.conditions {
                    conditions.push(condition.try_replace_leafs_inner(handler)?);
                }

                Ok(ConditionTreeBranch {
                    aggregator: branch.aggregator,
                    conditions,
                }
                .into())
            }
        }
    }

    /// Replace leaves with precomputed trees, in traversal order.
    ///
    /// Used after resolving replacements asynchronously from [`ConditionTree::leaves`].
    pub fn replace_leafs_in_order(
        &self,
        replacements: Vec<ConditionTree>,
    ) -> Result<ConditionTree> {
        let expected = self.leaves().len();
        if replacements.len() != expected {
            return Err(DataError::internal(format!(
                "Expected {} leaf replacements, got {}",
                expected,
                replacements.len()
            )));
        }

        let mut replacements = replacements.into_iter();
        self.try_replace_leafs(|_| {
            replacements
                .next()
                .ok_or_else(|| DataError::internal("Leaf replacements exhausted"))
        })
    }

    pub fn for_each_leaf<F>(&self, mut handler: F)
    where
        F: FnMut(&ConditionTreeLeaf),
    {
        self.for_each_leaf_inner(&mut handler);
    }

    fn for_each_leaf_inner<F>(&self, handler: &mut F)
    where
        F: FnMut(&ConditionTreeLeaf),
    {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => {
                for condition in &branch.conditions {
                    condition.for_each_leaf_inner(handler);
                }
            }
        }
    }

    /// All leaves, in traversal order
    pub fn leaves(&self) -> Vec<&ConditionTreeLeaf> {
        match self {
            ConditionTree::Leaf(leaf) => vec![leaf],
            ConditionTree::Branch(branch) => branch
                .conditions
                .iter()
                .flat_map(ConditionTree::leaves)
                .collect(),
        }
    }

    pub fn every_leaf<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ConditionTreeLeaf) -> bool,
    {
        self.leaves().into_iter().all(predicate)
    }

    pub fn some_leaf<F>(&self, predicate: F) -> bool
    where
        F: Fn(&ConditionTreeLeaf) -> bool,
    {
        self.leaves().into_iter().any(predicate)
    }

    /// Fields needed to evaluate the tree
    pub fn projection(&self) -> Projection {
        Projection::new(self.leaves().into_iter().map(|leaf| leaf.field.clone()))
    }

    /// Prefix every field with a relation name
    pub fn nest(&self, prefix: &str) -> ConditionTree {
        self.replace_leafs(|leaf| {
            leaf.with_field(format!("{}{}{}", prefix, PATH_SEPARATOR, leaf.field))
                .into()
        })
    }

    /// Strip the relation prefix shared by every field
    pub fn unnest(&self) -> Result<ConditionTree> {
        let leaves = self.leaves();
        let Some(first) = leaves.first() else {
            return Ok(self.clone());
        };

        let (prefix, rest) = split_path(&first.field);
        if rest.is_none() {
            return Err(DataError::validation("Cannot unnest condition tree"));
        }

        let nested_prefix = format!("{}{}", prefix, PATH_SEPARATOR);
        if !leaves.iter().all(|leaf| leaf.field.starts_with(&nested_prefix)) {
            return Err(DataError::validation("Cannot unnest condition tree"));
        }

        Ok(self.replace_leafs(|leaf| leaf.with_field(&leaf.field[nested_prefix.len()..]).into()))
    }

    pub fn matches(&self, record: &RecordData, ctx: &EvalContext) -> Result<bool> {
        match self {
            ConditionTree::Leaf(leaf) => leaf.matches(record, ctx),
            ConditionTree::Branch(branch) => {
                for condition in &branch.conditions {
                    let matched = condition.matches(record, ctx)?;
                    match (branch.aggregator, matched) {
                        (Aggregator::And, false) => return Ok(false),
                        (Aggregator::Or, true) => return Ok(true),
                        _ => {}
                    }
                }
                Ok(branch.aggregator == Aggregator::And)
            }
        }
    }

    /// Keep the records matching the tree
    pub fn apply(&self, records: Vec<RecordData>, ctx: &EvalContext) -> Result<Vec<RecordData>> {
        let mut matching = Vec::with_capacity(records.len());
        for record in records {
            if self.matches(&record, ctx)? {
                matching.push(record);
            }
        }
        Ok(matching)
    }
}
