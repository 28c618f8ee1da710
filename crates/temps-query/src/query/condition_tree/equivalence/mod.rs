//! Rewrite rules between filter operators.
//!
//! Each operator has a list of alternatives: a rewrite into other operators
//! that selects the same records. [`resolve`] searches the alternatives
//! transitively until every leaf only uses operators a collection supports.

mod comparison;
pub mod pattern;
pub mod time;

use std::collections::BTreeSet;
use std::fmt;

use super::{ConditionTree, ConditionTreeLeaf};
use crate::error::{DataError, Result};
use crate::query::context::EvalContext;
use crate::query::operator::{allowed_operators, Operator};
use crate::types::ColumnType;

pub type ReplacerFn = fn(&ConditionTreeLeaf, &ColumnType, &EvalContext) -> Result<ConditionTree>;

/// A rewrite of one operator into a tree using `depends_on` operators
pub struct Alternative {
    pub depends_on: &'static [Operator],
    pub applies_to: fn(&ColumnType) -> bool,
    pub replacer: ReplacerFn,
}

impl fmt::Debug for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternative")
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

pub(crate) fn any_type(_: &ColumnType) -> bool {
    true
}

pub(crate) fn string_type(column_type: &ColumnType) -> bool {
    matches!(column_type, ColumnType::String)
}

pub(crate) fn date_type(column_type: &ColumnType) -> bool {
    column_type.is_date()
}

/// Known alternatives for an operator, in order of preference
pub fn alternatives(operator: Operator) -> &'static [Alternative] {
    if operator.is_relative_date() {
        return time::alternatives(operator);
    }

    match comparison::alternatives(operator) {
        [] => pattern::alternatives(operator),
        found => found,
    }
}

/// Plan for evaluating one operator with a restricted operator set
#[derive(Debug, Clone)]
pub enum Replacer {
    /// The operator is supported as-is
    Native,
    /// The leaf is rewritten, then each produced leaf is replaced recursively
    Rewrite {
        alternative: &'static Alternative,
        dependencies: Vec<(Operator, Replacer)>,
    },
}

impl Replacer {
    pub fn apply(
        &self,
        leaf: &ConditionTreeLeaf,
        column_type: &ColumnType,
        ctx: &EvalContext,
    ) -> Result<ConditionTree> {
        match self {
            Replacer::Native => Ok(leaf.clone().into()),
            Replacer::Rewrite {
                alternative,
                dependencies,
            } => {
                let tree = (alternative.replacer)(leaf, column_type, ctx)?;

                tree.try_replace_leafs(|sub_leaf| {
                    let (_, replacer) = dependencies
                        .iter()
                        .find(|(operator, _)| *operator == sub_leaf.operator)
                        .ok_or_else(|| {
                            DataError::internal(format!(
                                "Rewrite of '{}' produced undeclared operator '{}'",
                                leaf.operator, sub_leaf.operator
                            ))
                        })?;
                    replacer.apply(sub_leaf, column_type, ctx)
                })
            }
        }
    }
}

/// Find a way to express `operator` using only `supported` operators
pub fn resolve(
    operator: Operator,
    supported: &BTreeSet<Operator>,
    column_type: &ColumnType,
) -> Option<Replacer> {
    resolve_inner(operator, supported, column_type, &mut Vec::new())
}

fn resolve_inner(
    operator: Operator,
    supported: &BTreeSet<Operator>,
    column_type: &ColumnType,
    visiting: &mut Vec<Operator>,
) -> Option<Replacer> {
    if supported.contains(&operator) {
        return Some(Replacer::Native);
    }
    if visiting.contains(&operator) {
        return None;
    }

    visiting.push(operator);
    let found = alternatives(operator)
        .iter()
        .filter(|alternative| (alternative.applies_to)(column_type))
        .find_map(|alternative| {
            let mut dependencies = Vec::with_capacity(alternative.depends_on.len());
            for dependency in alternative.depends_on {
                let replacer = resolve_inner(*dependency, supported, column_type, visiting)?;
                dependencies.push((*dependency, replacer));
            }
            Some(Replacer::Rewrite {
                alternative,
                dependencies,
            })
        });
    visiting.pop();

    found
}

/// Every operator reachable from `supported` through rewrites
pub fn emulable_operators(
    supported: &BTreeSet<Operator>,
    column_type: &ColumnType,
) -> BTreeSet<Operator> {
    allowed_operators(column_type)
        .into_iter()
        .filter(|operator| resolve(*operator, supported, column_type).is_some())
        .collect()
}
