//! Computed fields.
//!
//! A computed field is declared with a column type, the paths it depends on
//! and an async handler producing one value per record. Projections are
//! rewritten to the dependencies before reaching the child and values are
//! computed afterwards, dependencies first. Filters and sorts touching
//! computed fields are evaluated in memory.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use temps_query::record::{split_path, PATH_SEPARATOR};
use temps_query::{
    allowed_operators, ActionField, ActionResult, AggregateResult, Aggregation, Caller,
    Collection, CollectionRef, CollectionSchema, ColumnSchema, ColumnType, ConditionTree,
    DataError, Datasource, Filter, PaginatedFilter, Projection, RecordData, Result,
};
use tracing::debug;

use crate::layer::{key_match, nested_records, split_conjuncts, visit_nested, wrap};

pub type ComputedFuture = BoxFuture<'static, Result<Vec<Value>>>;
pub type ComputedHandler =
    Arc<dyn Fn(Vec<RecordData>, ComputedContext) -> ComputedFuture + Send + Sync>;

/// Passed to computed field handlers
#[derive(Debug, Clone)]
pub struct ComputedContext {
    pub caller: Caller,
    /// Collection owning the computed field
    pub collection: String,
}

/// Declaration of a computed field
#[derive(Clone)]
pub struct ComputedDefinition {
    pub column_type: ColumnType,
    /// Paths read by the handler, relative to the owning collection
    pub dependencies: Vec<String>,
    pub enum_values: Vec<String>,
    handler: ComputedHandler,
}

impl std::fmt::Debug for ComputedDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedDefinition")
            .field("column_type", &self.column_type)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl ComputedDefinition {
    /// `handler` receives records reduced to `dependencies` and must return
    /// exactly one value per record, in order
    pub fn new<F, Fut>(column_type: ColumnType, dependencies: &[&str], handler: F) -> Self
    where
        F: Fn(Vec<RecordData>, ComputedContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
    {
        let handler: ComputedHandler = Arc::new(
            move |records: Vec<RecordData>, context: ComputedContext| {
                handler(records, context).boxed()
            },
        );

        Self {
            column_type,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            enum_values: Vec::new(),
            handler,
        }
    }

    pub fn with_enum_values(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Whether every dependency is a field of the owning collection itself
    pub fn has_local_dependencies(&self) -> bool {
        self.dependencies
            .iter()
            .all(|dependency| !dependency.contains(PATH_SEPARATOR))
    }

    fn column_schema(&self) -> ColumnSchema {
        let mut column = ColumnSchema::new(self.column_type.clone())
            .with_operators(allowed_operators(&self.column_type))
            .sortable()
            .read_only();
        column.enum_values = self.enum_values.clone();
        column
    }
}

/// Computed fields of one layer, by collection then field name
pub type ComputedRegistry = BTreeMap<String, BTreeMap<String, ComputedDefinition>>;

/// One field to compute at a relation prefix
#[derive(Debug, Clone)]
struct Task {
    prefix: Vec<String>,
    collection: String,
    field: String,
}

pub struct ComputedCollection {
    child: CollectionRef,
    child_datasource: Arc<Datasource>,
    registry: Arc<ComputedRegistry>,
    schema: CollectionSchema,
}

impl ComputedCollection {
    pub fn new(
        child: CollectionRef,
        child_datasource: Arc<Datasource>,
        registry: Arc<ComputedRegistry>,
    ) -> Self {
        let mut schema = child.schema().clone();
        if let Some(fields) = registry.get(child.name()) {
            for (name, definition) in fields {
                schema = schema.with_field(name.clone(), definition.column_schema());
            }
        }

        Self {
            child,
            child_datasource,
            registry,
            schema,
        }
    }

    fn definition(&self, collection: &str, field: &str) -> Option<&ComputedDefinition> {
        self.registry.get(collection)?.get(field)
    }

    fn foreign_collection(&self, collection: &str, relation: &str) -> Result<String> {
        let schema = self.child_datasource.collection(collection)?.schema();
        Ok(schema.relation(relation)?.foreign_collection().to_string())
    }

    /// Whether `path`, read from `collection`, ends on a computed field
    fn is_computed(&self, collection: &str, path: &str) -> bool {
        match split_path(path) {
            (field, None) => self.definition(collection, field).is_some(),
            (relation, Some(rest)) => match self.foreign_collection(collection, relation) {
                Ok(foreign) => self.is_computed(&foreign, rest),
                Err(_) => false,
            },
        }
    }

    fn tree_is_computed(&self, tree: &ConditionTree) -> bool {
        tree.some_leaf(|leaf| self.is_computed(self.name(), &leaf.field))
    }

    /// Child projection and computations needed to answer `projection`
    fn plan(&self, projection: &Projection) -> Result<(Projection, Vec<Task>)> {
        let mut child_paths = Vec::new();
        let mut tasks = Vec::new();
        let mut seen = HashSet::new();

        for path in projection.iter() {
            self.expand(
                self.name(),
                &[],
                path,
                &mut child_paths,
                &mut tasks,
                &mut seen,
            )?;
        }

        Ok((Projection::new(child_paths), tasks))
    }

    fn expand(
        &self,
        collection: &str,
        prefix: &[String],
        path: &str,
        child_paths: &mut Vec<String>,
        tasks: &mut Vec<Task>,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let separator = PATH_SEPARATOR.to_string();
        let nest = |field: &str| {
            prefix
                .iter()
                .map(String::as_str)
                .chain([field])
                .collect::<Vec<_>>()
                .join(separator.as_str())
        };

        match split_path(path) {
            (relation, Some(rest)) => {
                let foreign = self.foreign_collection(collection, relation)?;
                let mut nested_prefix = prefix.to_vec();
                nested_prefix.push(relation.to_string());
                self.expand(&foreign, &nested_prefix, rest, child_paths, tasks, seen)
            }
            (field, None) => {
                let Some(definition) = self.definition(collection, field) else {
                    child_paths.push(nest(field));
                    return Ok(());
                };

                let full_path = nest(field);
                if seen.contains(&full_path) {
                    return Ok(());
                }
                for dependency in &definition.dependencies {
                    self.expand(collection, prefix, dependency, child_paths, tasks, seen)?;
                }
                if seen.insert(full_path) {
                    tasks.push(Task {
                        prefix: prefix.to_vec(),
                        collection: collection.to_string(),
                        field: field.to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Run the tasks in order, writing values into the records
    async fn compute(
        &self,
        caller: &Caller,
        tasks: &[Task],
        records: &mut [RecordData],
    ) -> Result<()> {
        for task in tasks {
            let Some(definition) = self.definition(&task.collection, &task.field) else {
                continue;
            };

            let targets = nested_records(records, &task.prefix);
            if targets.is_empty() {
                continue;
            }

            let dependencies = Projection::new(definition.dependencies.iter().map(String::as_str));
            let mut unique = Vec::new();
            let mut index: HashMap<String, usize> = HashMap::new();
            let mut positions = Vec::with_capacity(targets.len());
            for target in &targets {
                let reduced = dependencies.apply_record(target);
                let key = Value::Object(reduced.clone()).to_string();
                let position = *index.entry(key).or_insert_with(|| {
                    unique.push(reduced);
                    unique.len() - 1
                });
                positions.push(position);
            }

            debug!(
                "Computing '{}' on '{}' for {} distinct records",
                task.field,
                task.collection,
                unique.len()
            );
            let expected = unique.len();
            let context = ComputedContext {
                caller: caller.clone(),
                collection: task.collection.clone(),
            };
            let values = (definition.handler)(unique, context).await?;
            if values.len() != expected {
                return Err(DataError::internal(format!(
                    "Computed field '{}' returned {} values for {} records",
                    task.field,
                    values.len(),
                    expected
                )));
            }

            let mut visited = 0;
            visit_nested(records, &task.prefix, &mut |record| {
                let value = positions
                    .get(visited)
                    .and_then(|position| values.get(*position))
                    .cloned()
                    .unwrap_or(Value::Null);
                record.insert(task.field.clone(), value);
                visited += 1;
            });
        }
        Ok(())
    }

    /// List the child and compute the projected computed fields
    async fn list_computed(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        let (child_projection, tasks) = self.plan(projection)?;
        let mut records = self.child.list(caller, filter, &child_projection).await?;
        self.compute(caller, &tasks, &mut records).await?;
        Ok(records)
    }

    /// Records matching a filter touching computed fields, with `projection`
    /// computed, unsorted
    async fn list_emulated(
        &self,
        caller: &Caller,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        let (pushed, kept) = split_conjuncts(filter.condition_tree.as_ref(), |condition| {
            !self.tree_is_computed(condition)
        });
        debug!(
            "Emulating filter on computed fields of '{}' in memory",
            self.name()
        );

        let needed = match &kept {
            Some(tree) => projection.union(&tree.projection()),
            None => projection.clone(),
        };
        let child_filter = PaginatedFilter::new(filter.clone().with_condition_tree(pushed));
        let records = self.list_computed(caller, &child_filter, &needed).await?;

        match kept {
            Some(tree) => tree.apply(records, &filter.eval_context()?),
            None => Ok(records),
        }
    }

    fn check_writes<'a>(&self, fields: impl IntoIterator<Item = &'a String>) -> Result<()> {
        for field in fields {
            if self.definition(self.name(), field).is_some() {
                return Err(DataError::validation(format!(
                    "Computed field '{}' of '{}' is read-only",
                    field,
                    self.name()
                )));
            }
        }
        Ok(())
    }

    /// Filter equivalent to `filter` without computed fields
    async fn resolve_filter(&self, caller: &Caller, filter: &Filter) -> Result<Filter> {
        match &filter.condition_tree {
            Some(tree) if self.tree_is_computed(tree) => {
                let schema = self.child.schema();
                let records = self
                    .list_emulated(caller, filter, &Projection::default().with_pks(schema))
                    .await?;
                let tree = key_match(schema, self.name(), &records, &filter.eval_context()?)?;
                Ok(filter.clone().with_condition_tree(Some(tree)))
            }
            _ => Ok(filter.clone()),
        }
    }
}

#[async_trait]
impl Collection for ComputedCollection {
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
        let filter_computed = filter
            .filter
            .condition_tree
            .as_ref()
            .is_some_and(|tree| self.tree_is_computed(tree));
        let sort_computed = filter
            .sort
            .clauses()
            .iter()
            .any(|clause| self.is_computed(self.name(), &clause.field));

        if !filter_computed && !sort_computed {
            let records = self.list_computed(caller, filter, projection).await?;
            return Ok(projection.apply(records));
        }

        let needed = projection.union(&filter.sort.projection());
        let records = self.list_emulated(caller, &filter.filter, &needed).await?;
        let records = filter.sort.apply(records);
        let records = match &filter.page {
            Some(page) => page.apply(records),
            None => records,
        };
        Ok(projection.apply(records))
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        for record in &data {
            self.check_writes(record.keys())?;
        }
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        self.check_writes(patch.keys())?;
        let filter = self.resolve_filter(caller, filter).await?;
        self.child.update(caller, &filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        let filter = self.resolve_filter(caller, filter).await?;
        self.child.delete(caller, &filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let filter_computed = filter
            .condition_tree
            .as_ref()
            .is_some_and(|tree| self.tree_is_computed(tree));
        let aggregation_computed = aggregation
            .projection()
            .iter()
            .any(|field| self.is_computed(self.name(), field));

        if !filter_computed && !aggregation_computed {
            return self.child.aggregate(caller, filter, aggregation, limit).await;
        }

        debug!("Aggregating computed fields of '{}' in memory", self.name());
        let records = self
            .list_emulated(caller, filter, &aggregation.projection())
            .await?;
        Ok(aggregation.apply(&records, filter.eval_context()?.timezone, limit))
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        let filter = self.resolve_filter(caller, filter).await?;
        self.child.execute(caller, name, form_values, &filter).await
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

/// Check that a dependency path exists below the layer or among the fields
/// registered before it
fn check_dependency(
    child: &Datasource,
    registry: &ComputedRegistry,
    collection: &str,
    field: &str,
    path: &str,
) -> Result<()> {
    let schema = child.collection(collection)?.schema();
    match split_path(path) {
        (relation, Some(rest)) => {
            let relation = schema.relation(relation).map_err(|_| {
                DataError::validation(format!(
                    "Dependency '{}' of computed field '{}' is not a relation path",
                    path, field
                ))
            })?;
            check_dependency(child, registry, relation.foreign_collection(), field, rest)
        }
        (name, None) => {
            let known = schema.column(name).is_ok()
                || registry
                    .get(collection)
                    .is_some_and(|fields| fields.contains_key(name));
            if known {
                Ok(())
            } else {
                Err(DataError::validation(format!(
                    "Dependency '{}' of computed field '{}' not found on '{}'",
                    name, field, collection
                )))
            }
        }
    }
}

/// Build a layer adding `fields` (collection, name, definition) over `child`.
/// Dependencies must be registered before the fields using them.
pub(crate) fn layer(
    child: &Arc<Datasource>,
    fields: Vec<(String, String, ComputedDefinition)>,
) -> Result<Arc<Datasource>> {
    let mut registry = ComputedRegistry::new();

    for (collection, name, definition) in fields {
        let schema = child.collection(&collection)?.schema();
        let taken = schema.field(&name).is_some()
            || registry
                .get(&collection)
                .is_some_and(|fields| fields.contains_key(&name));
        if taken {
            return Err(DataError::validation(format!(
                "Field '{}' already exists on '{}'",
                name, collection
            )));
        }
        if definition.dependencies.is_empty() {
            return Err(DataError::validation(format!(
                "Computed field '{}' must declare at least one dependency",
                name
            )));
        }
        for dependency in &definition.dependencies {
            check_dependency(child, &registry, &collection, &name, dependency)?;
        }

        debug!("Adding computed field '{}' to '{}'", name, collection);
        registry.entry(collection).or_default().insert(name, definition);
    }

    let registry = Arc::new(registry);
    wrap(child, |collection| {
        Ok(Some(Arc::new(ComputedCollection::new(
            collection.clone(),
            child.clone(),
            registry.clone(),
        )) as CollectionRef))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use temps_query::{ConditionTreeLeaf, Operator, Sort, SortClause};
    use temps_query_memory::MemoryCollection;

    fn people() -> Arc<MemoryCollection> {
        Arc::new(
            MemoryCollection::new(
                "people",
                CollectionSchema::new()
                    .with_field(
                        "id",
                        ColumnSchema::new(ColumnType::Number)
                            .primary_key()
                            .with_operators([Operator::Equal, Operator::In]),
                    )
                    .with_field("first", ColumnSchema::new(ColumnType::String))
                    .with_field("last", ColumnSchema::new(ColumnType::String)),
            )
            .with_records(vec![
                json!({"id": 1, "first": "Ada", "last": "Lovelace"}),
                json!({"id": 2, "first": "Alan", "last": "Turing"}),
                json!({"id": 3, "first": "Ada", "last": "Byron"}),
            ]),
        )
    }

    fn text<'a>(record: &'a RecordData, field: &str) -> &'a str {
        record.get(field).and_then(Value::as_str).unwrap_or("")
    }

    fn full_name() -> ComputedDefinition {
        ComputedDefinition::new(ColumnType::String, &["first", "last"], |records, _| async move {
            Ok(records
                .iter()
                .map(|r| json!(format!("{} {}", text(r, "first"), text(r, "last"))))
                .collect())
        })
    }

    fn build(
        fields: Vec<(String, String, ComputedDefinition)>,
    ) -> (Arc<MemoryCollection>, CollectionRef) {
        let memory = people();
        let child = Arc::new(Datasource::new(vec![memory.clone() as CollectionRef]).unwrap());
        let layer = layer(&child, fields).unwrap();
        let people = layer.collection("people").unwrap().clone();
        (memory, people)
    }

    #[tokio::test]
    async fn test_compute_projected_field() {
        let (_, people) = build(vec![("people".into(), "fullName".into(), full_name())]);
        let records = people
            .list(&Caller::system(), &PaginatedFilter::default(), &Projection::new(["fullName"]))
            .await
            .unwrap();

        assert_eq!(records[0], json!({"fullName": "Ada Lovelace"}).as_object().cloned().unwrap());
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_dependencies_are_deduplicated_and_chained() {
        let initials =
            ComputedDefinition::new(ColumnType::String, &["fullName"], |records, _| async move {
                Ok(records
                    .iter()
                    .map(|r| {
                        let name = text(r, "fullName");
                        json!(name.split(' ').filter_map(|w| w.chars().next()).collect::<String>())
                    })
                    .collect())
            });
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counted = calls.clone();
        let greeting = ComputedDefinition::new(ColumnType::String, &["first"], move |records, _| {
            counted.fetch_add(records.len(), std::sync::atomic::Ordering::SeqCst);
            async move {
                Ok(records
                    .iter()
                    .map(|r| json!(format!("Hi {}", text(r, "first"))))
                    .collect())
            }
        });

        let (_, people) = build(vec![
            ("people".into(), "fullName".into(), full_name()),
            ("people".into(), "initials".into(), initials),
            ("people".into(), "greeting".into(), greeting),
        ]);
        let records = people
            .list(
                &Caller::system(),
                &PaginatedFilter::default(),
                &Projection::new(["initials", "greeting"]),
            )
            .await
            .unwrap();

        assert_eq!(records[0]["initials"], json!("AL"));
        assert_eq!(records[2]["greeting"], json!("Hi Ada"));
        // "Ada" appears twice but is computed once
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_filter_and_sort_on_computed_field() {
        let (memory, people) = build(vec![("people".into(), "fullName".into(), full_name())]);
        let tree = ConditionTree::and(vec![
            ConditionTreeLeaf::new("id", Operator::In, json!([1, 2, 3])).into(),
            ConditionTreeLeaf::new("fullName", Operator::StartsWith, json!("A")).into(),
        ]);
        let filter = PaginatedFilter::new(Filter::new().with_condition_tree(Some(tree)))
            .with_sort(Sort::new(vec![SortClause::ascending("fullName")]));

        let records = people
            .list(&Caller::system(), &filter, &Projection::new(["id"]))
            .await
            .unwrap();

        let ids: Vec<Value> = records.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(1), json!(2)]);

        // the non-computed conjunct was pushed down
        let calls = memory.calls();
        let temps_query_memory::Call::List { filter, .. } = &calls[0] else {
            panic!("expected a list call");
        };
        assert_eq!(
            filter.filter.condition_tree,
            Some(ConditionTreeLeaf::new("id", Operator::In, json!([1, 2, 3])).into())
        );
        assert!(filter.sort.is_empty());
    }

    #[tokio::test]
    async fn test_computed_fields_are_read_only() {
        let (_, people) = build(vec![("people".into(), "fullName".into(), full_name())]);
        let patch = json!({"fullName": "X Y"}).as_object().cloned().unwrap();
        let error = people
            .update(&Caller::system(), &Filter::new(), &patch)
            .await
            .unwrap_err();
        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn test_delete_with_computed_filter() {
        let (memory, people) = build(vec![("people".into(), "fullName".into(), full_name())]);
        let filter = Filter::new().with_condition_tree(Some(
            ConditionTreeLeaf::new("fullName", Operator::Equal, json!("Alan Turing")).into(),
        ));
        people.delete(&Caller::system(), &filter).await.unwrap();

        let remaining: Vec<Value> =
            memory.records().await.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(remaining, vec![json!(1), json!(3)]);
    }

    #[tokio::test]
    async fn test_aggregate_on_computed_field() {
        let (_, people) = build(vec![("people".into(), "fullName".into(), full_name())]);
        let aggregation = Aggregation::count()
            .with_group(temps_query::AggregationGroup::new("fullName"));
        let results = people
            .aggregate(&Caller::system(), &Filter::new(), &aggregation, Some(2))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let memory = people();
        let child = Arc::new(Datasource::new(vec![memory as CollectionRef]).unwrap());
        let definition =
            ComputedDefinition::new(ColumnType::String, &["middle"], |records, _| async move {
                Ok(vec![Value::Null; records.len()])
            });
        let error = layer(&child, vec![("people".into(), "x".into(), definition)]).unwrap_err();
        assert!(error.is_validation());
    }
}
