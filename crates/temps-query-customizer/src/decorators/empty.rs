//! Short-circuits requests whose condition tree cannot match anything.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use temps_query::record::values_equal;
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, Aggregator, Caller, Collection,
    CollectionRef, CollectionSchema, ConditionTree, Datasource, Filter, Operator, PaginatedFilter,
    Projection, RecordData, Result,
};
use tracing::debug;

use crate::layer::wrap;

/// Whether `tree` provably matches no record
pub fn is_empty_tree(tree: &ConditionTree) -> bool {
    match tree {
        ConditionTree::Leaf(leaf) => {
            leaf.operator == Operator::In
                && matches!(&leaf.value, Some(Value::Array(items)) if items.is_empty())
        }
        ConditionTree::Branch(branch) => match branch.aggregator {
            Aggregator::Or => branch.conditions.iter().all(is_empty_tree),
            Aggregator::And => {
                branch.conditions.iter().any(is_empty_tree)
                    || has_conflicting_values(&branch.conditions)
            }
        },
    }
}

/// `Equal`/`In` leaves of one `And` that accept disjoint values for a field.
/// Values are compared the way leaves evaluate them, so dates match by instant.
fn has_conflicting_values(conditions: &[ConditionTree]) -> bool {
    let mut allowed: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();

    for condition in conditions {
        let ConditionTree::Leaf(leaf) = condition else {
            continue;
        };
        let values: Vec<&Value> = match (leaf.operator, &leaf.value) {
            (Operator::Equal, Some(value)) => vec![value],
            (Operator::In, Some(Value::Array(items))) => items.iter().collect(),
            _ => continue,
        };

        let entry = allowed
            .entry(leaf.field.as_str())
            .or_insert_with(|| values.clone());
        entry.retain(|kept| values.iter().any(|value| values_equal(kept, value)));
        if entry.is_empty() {
            return true;
        }
    }

    false
}

fn is_empty_filter(filter: &Filter) -> bool {
    filter.condition_tree.as_ref().is_some_and(is_empty_tree)
}

pub struct EmptyCollection {
    child: CollectionRef,
}

impl EmptyCollection {
    pub fn new(child: CollectionRef) -> Self {
        Self { child }
    }
}

#[async_trait]
impl Collection for EmptyCollection {
    fn name(&self) -> &str {
        self.child.name()
    }

    fn schema(&self) -> &CollectionSchema {
        self.child.schema()
    }

    async fn list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        if is_empty_filter(&filter.filter) {
            debug!("Skipping list on '{}': filter matches nothing", self.name());
            return Ok(Vec::new());
        }
        self.child.list(caller, filter, projection).await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        if is_empty_filter(filter) {
            debug!("Skipping update on '{}': filter matches nothing", self.name());
            return Ok(());
        }
        self.child.update(caller, filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        if is_empty_filter(filter) {
            debug!("Skipping delete on '{}': filter matches nothing", self.name());
            return Ok(());
        }
        self.child.delete(caller, filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        if is_empty_filter(filter) {
            return Ok(Vec::new());
        }
        self.child.aggregate(caller, filter, aggregation, limit).await
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        self.child.execute(caller, name, form_values, filter).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        form_values: Option<&RecordData>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        self.child.get_form(caller, name, form_values, filter).await
    }
}

pub(crate) fn layer(child: &Arc<Datasource>) -> Result<Arc<Datasource>> {
    wrap(child, |collection| {
        Ok(Some(
            Arc::new(EmptyCollection::new(collection.clone())) as CollectionRef
        ))
    })
}
