//! Named segments resolved into condition trees.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use temps_query::utils::resolve_column;
use temps_query::{
    factory, ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection,
    CollectionRef, CollectionSchema, ConditionTree, DataError, Datasource, Filter,
    PaginatedFilter, Projection, RecordData, Result,
};
use tracing::debug;

use crate::layer::wrap;

/// Passed to dynamic segment resolvers
#[derive(Debug, Clone)]
pub struct SegmentContext {
    pub caller: Caller,
    pub collection: String,
    pub timezone: String,
}

pub type SegmentHandler =
    Arc<dyn Fn(SegmentContext) -> BoxFuture<'static, Result<ConditionTree>> + Send + Sync>;

#[derive(Clone)]
pub enum SegmentDefinition {
    Static(ConditionTree),
    Dynamic(SegmentHandler),
}

impl SegmentDefinition {
    pub fn dynamic<F, Fut>(handler: F) -> Self
    where
        F: Fn(SegmentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ConditionTree>> + Send + 'static,
    {
        SegmentDefinition::Dynamic(Arc::new(move |context: SegmentContext| {
            handler(context).boxed()
        }))
    }
}

impl std::fmt::Debug for SegmentDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentDefinition::Static(tree) => f.debug_tuple("Static").field(tree).finish(),
            SegmentDefinition::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

impl From<ConditionTree> for SegmentDefinition {
    fn from(tree: ConditionTree) -> Self {
        SegmentDefinition::Static(tree)
    }
}

pub struct SegmentCollection {
    child: CollectionRef,
    child_datasource: Arc<Datasource>,
    segments: BTreeMap<String, SegmentDefinition>,
    schema: CollectionSchema,
}

impl SegmentCollection {
    pub fn new(
        child: CollectionRef,
        child_datasource: Arc<Datasource>,
        segments: BTreeMap<String, SegmentDefinition>,
    ) -> Self {
        let mut schema = child.schema().clone();
        for name in segments.keys() {
            schema = schema.with_segment(name.clone());
        }

        Self {
            child,
            child_datasource,
            segments,
            schema,
        }
    }

    async fn rewrite_filter(&self, caller: &Caller, filter: &Filter) -> Result<Filter> {
        let Some(segment) = &filter.segment else {
            return Ok(filter.clone());
        };

        let Some(definition) = self.segments.get(segment) else {
            if self.child.schema().segments.contains(segment) {
                return Ok(filter.clone());
            }
            return Err(DataError::not_found(format!(
                "Segment '{}' not found on '{}'",
                segment,
                self.name()
            )));
        };

        let tree = match definition {
            SegmentDefinition::Static(tree) => tree.clone(),
            SegmentDefinition::Dynamic(handler) => {
                debug!("Resolving segment '{}' of '{}'", segment, self.name());
                handler(SegmentContext {
                    caller: caller.clone(),
                    collection: self.name().to_string(),
                    timezone: filter.timezone.clone(),
                })
                .await?
            }
        };

        for leaf in tree.leaves() {
            resolve_column(
                Some(self.child_datasource.as_ref()),
                self.child.schema(),
                &leaf.field,
            )
            .map_err(|error| {
                DataError::validation(format!(
                    "Segment '{}' of '{}' is invalid: {}",
                    segment,
                    self.name(),
                    error
                ))
            })?;
        }

        Ok(filter
            .clone()
            .with_condition_tree(factory::intersect(vec![
                filter.condition_tree.clone(),
                Some(tree),
            ]))
            .with_segment(None))
    }
}

#[async_trait]
impl Collection for SegmentCollection {
    fn name(&self) -> &str {
        self.child.name()
    }

    fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    async fn list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        let rewritten = self.rewrite_filter(caller, &filter.filter).await?;
        self.child
            .list(caller, &filter.clone().with_filter(rewritten), projection)
            .await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child.update(caller, &rewritten, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child.delete(caller, &rewritten).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child
            .aggregate(caller, &rewritten, aggregation, limit)
            .await
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child.execute(caller, name, form_values, &rewritten).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        form_values: Option<&RecordData>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        let rewritten = match filter {
            Some(filter) => Some(self.rewrite_filter(caller, filter).await?),
            None => None,
        };
        self.child
            .get_form(caller, name, form_values, rewritten.as_ref())
            .await
    }
}

/// Build a layer adding `segments` (collection -> name -> definition).
/// Static trees are checked against the child schemas right away.
pub(crate) fn layer(
    child: &Arc<Datasource>,
    mut segments: HashMap<String, BTreeMap<String, SegmentDefinition>>,
) -> Result<Arc<Datasource>> {
    for (collection, definitions) in &segments {
        let schema = child.collection(collection)?.schema();
        for (name, definition) in definitions {
            if schema.segments.contains(name) {
                return Err(DataError::validation(format!(
                    "Segment '{}' already exists on '{}'",
                    name, collection
                )));
            }
            if let SegmentDefinition::Static(tree) = definition {
                for leaf in tree.leaves() {
                    resolve_column(Some(child.as_ref()), schema, &leaf.field)?;
                }
            }
        }
    }

    wrap(child, |collection| {
        let definitions = segments.remove(collection.name()).unwrap_or_default();
        Ok(Some(Arc::new(SegmentCollection::new(
            collection.clone(),
            child.clone(),
            definitions,
        )) as CollectionRef))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use temps_query::{ColumnSchema, ColumnType, ConditionTreeLeaf, Operator};
    use temps_query_memory::MemoryCollection;

    fn orders() -> Arc<MemoryCollection> {
        Arc::new(
            MemoryCollection::new(
                "orders",
                CollectionSchema::new()
                    .with_field(
                        "id",
                        ColumnSchema::new(ColumnType::Number)
                            .primary_key()
                            .with_operators([Operator::Equal, Operator::In]),
                    )
                    .with_field(
                        "status",
                        ColumnSchema::new(ColumnType::String).with_operators([Operator::Equal]),
                    )
                    .with_field(
                        "ownerId",
                        ColumnSchema::new(ColumnType::Number).with_operators([Operator::Equal]),
                    ),
            )
            .with_records(vec![
                json!({"id": 1, "status": "paid", "ownerId": 7}),
                json!({"id": 2, "status": "pending", "ownerId": 7}),
                json!({"id": 3, "status": "paid", "ownerId": 8}),
            ])
            .with_segment(
                "mine",
                ConditionTreeLeaf::new("ownerId", Operator::Equal, json!(7)).into(),
            ),
        )
    }

    fn build(definitions: Vec<(&str, SegmentDefinition)>) -> Result<Arc<Datasource>> {
        let child = Arc::new(Datasource::new(vec![orders() as CollectionRef]).unwrap());
        let mut segments = HashMap::new();
        segments.insert(
            "orders".to_string(),
            definitions
                .into_iter()
                .map(|(name, definition)| (name.to_string(), definition))
                .collect(),
        );
        layer(&child, segments)
    }

    async fn ids(
        layer: &Datasource,
        segment: &str,
        caller: &Caller,
    ) -> Result<Vec<serde_json::Value>> {
        let filter = PaginatedFilter::new(Filter::new().with_segment(Some(segment.to_string())));
        let records = layer
            .collection("orders")?
            .list(caller, &filter, &Projection::new(["id"]))
            .await?;
        Ok(records.into_iter().map(|r| r["id"].clone()).collect())
    }

    #[tokio::test]
    async fn test_static_segment() {
        let layer = build(vec![(
            "paid",
            SegmentDefinition::Static(
                ConditionTreeLeaf::new("status", Operator::Equal, json!("paid")).into(),
            ),
        )])
        .unwrap();

        assert!(layer.collection("orders").unwrap().schema().segments.contains("paid"));
        assert_eq!(
            ids(&layer, "paid", &Caller::system()).await.unwrap(),
            vec![json!(1), json!(3)]
        );
    }

    #[tokio::test]
    async fn test_dynamic_segment_uses_caller() {
        let layer = build(vec![(
            "owned",
            SegmentDefinition::dynamic(|context: SegmentContext| async move {
                let owner = json!(context.caller.id);
                Ok(ConditionTreeLeaf::new("ownerId", Operator::Equal, owner).into())
            }),
        )])
        .unwrap();

        assert_eq!(
            ids(&layer, "owned", &Caller::new(8, "eve@example.com")).await.unwrap(),
            vec![json!(3)]
        );
    }

    #[tokio::test]
    async fn test_child_segment_passes_through() {
        let layer = build(vec![]).unwrap();
        assert_eq!(
            ids(&layer, "mine", &Caller::system()).await.unwrap(),
            vec![json!(1), json!(2)]
        );
    }

    #[tokio::test]
    async fn test_unknown_segment() {
        let layer = build(vec![]).unwrap();
        let error = ids(&layer, "missing", &Caller::system()).await.unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_dynamic_segment_with_unknown_field() {
        let layer = build(vec![(
            "broken",
            SegmentDefinition::dynamic(|_| async move {
                Ok(ConditionTreeLeaf::new("missing", Operator::Equal, json!(1)).into())
            }),
        )])
        .unwrap();

        let error = ids(&layer, "broken", &Caller::system()).await.unwrap_err();
        assert!(error.is_validation());
    }

    #[test]
    fn test_static_segment_with_unknown_field() {
        let result = build(vec![(
            "broken",
            SegmentDefinition::Static(
                ConditionTreeLeaf::new("missing", Operator::Equal, json!(1)).into(),
            ),
        )]);
        assert!(result.unwrap_err().is_validation());
    }
}
