//! Renames collections and fields.
//!
//! Requests are translated to the child's names and results back, following
//! relation paths and nested relation objects into the collection they
//! target.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use temps_query::record::{split_path, PATH_SEPARATOR};
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, AggregationGroup, Caller, Collection,
    CollectionRef, CollectionSchema, ConditionTree, DataError, Datasource, FieldSchema, Filter,
    PaginatedFilter, Projection, RecordData, RelationSchema, Result, Sort, SortClause,
};
use tracing::debug;

use crate::layer::{field, wrap};

/// Field names of one child collection, in both directions
#[derive(Debug, Default)]
struct FieldNames {
    to_child: BTreeMap<String, String>,
    from_child: BTreeMap<String, String>,
}

/// Every rename of the layer, keyed by child collection name
struct Names {
    child: Arc<Datasource>,
    collections: HashMap<String, String>,
    fields: HashMap<String, FieldNames>,
}

impl Names {
    fn collection<'a>(&'a self, child_name: &'a str) -> &'a str {
        self.collections
            .get(child_name)
            .map(String::as_str)
            .unwrap_or(child_name)
    }

    fn field_from_child<'a>(&'a self, collection: &str, name: &'a str) -> &'a str {
        self.fields
            .get(collection)
            .and_then(|names| names.from_child.get(name))
            .map(String::as_str)
            .unwrap_or(name)
    }

    fn field_to_child(&self, collection: &str, name: &str) -> Result<String> {
        let Some(names) = self.fields.get(collection) else {
            return Ok(name.to_string());
        };
        if let Some(child_name) = names.to_child.get(name) {
            return Ok(child_name.clone());
        }
        if names.from_child.contains_key(name) {
            return Err(DataError::validation(format!(
                "Field '{}' not found on '{}'",
                name,
                self.collection(collection)
            )));
        }
        Ok(name.to_string())
    }

    fn foreign_collection(&self, collection: &str, child_field: &str) -> Option<String> {
        let schema = self.child.collection(collection).ok()?.schema();
        match schema.field(child_field)? {
            FieldSchema::Relation(relation) => Some(relation.foreign_collection().to_string()),
            FieldSchema::Column(_) => None,
        }
    }

    fn path_to_child(&self, collection: &str, path: &str) -> Result<String> {
        let (head, rest) = split_path(path);
        let child_head = self.field_to_child(collection, head)?;
        let Some(rest) = rest else {
            return Ok(child_head);
        };

        let foreign = self.foreign_collection(collection, &child_head).ok_or_else(|| {
            DataError::validation(format!(
                "Field '{}' of '{}' is not a relation",
                head,
                self.collection(collection)
            ))
        })?;
        Ok(format!(
            "{}{}{}",
            child_head,
            PATH_SEPARATOR,
            self.path_to_child(&foreign, rest)?
        ))
    }

    fn path_from_child(&self, collection: &str, path: &str) -> String {
        let (head, rest) = split_path(path);
        let renamed = self.field_from_child(collection, head).to_string();
        match (rest, self.foreign_collection(collection, head)) {
            (Some(rest), Some(foreign)) => format!(
                "{}{}{}",
                renamed,
                PATH_SEPARATOR,
                self.path_from_child(&foreign, rest)
            ),
            (Some(rest), None) => format!("{}{}{}", renamed, PATH_SEPARATOR, rest),
            (None, _) => renamed,
        }
    }

    fn tree_to_child(&self, collection: &str, tree: &ConditionTree) -> Result<ConditionTree> {
        tree.try_replace_leafs(|leaf| {
            Ok(leaf
                .with_field(self.path_to_child(collection, &leaf.field)?)
                .into())
        })
    }

    fn filter_to_child(&self, collection: &str, filter: &Filter) -> Result<Filter> {
        let tree = match &filter.condition_tree {
            Some(tree) => Some(self.tree_to_child(collection, tree)?),
            None => None,
        };
        Ok(filter.clone().with_condition_tree(tree))
    }

    fn record_to_child(&self, collection: &str, record: &RecordData) -> Result<RecordData> {
        record
            .iter()
            .map(|(name, value)| Ok((self.field_to_child(collection, name)?, value.clone())))
            .collect()
    }

    fn record_from_child(&self, collection: &str, record: RecordData) -> RecordData {
        record
            .into_iter()
            .map(|(name, value)| {
                let value = match self.foreign_collection(collection, &name) {
                    Some(foreign) => self.value_from_child(&foreign, value),
                    None => value,
                };
                (self.field_from_child(collection, &name).to_string(), value)
            })
            .collect()
    }

    fn value_from_child(&self, collection: &str, value: Value) -> Value {
        match value {
            Value::Object(record) => Value::Object(self.record_from_child(collection, record)),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.value_from_child(collection, item))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Published schema of a child collection
    fn schema(&self, collection: &str, schema: &CollectionSchema) -> CollectionSchema {
        let mut published = schema.clone();
        published.fields = schema
            .fields
            .iter()
            .map(|(name, field)| {
                let field = match field {
                    FieldSchema::Relation(relation) => {
                        FieldSchema::Relation(self.relation(collection, relation))
                    }
                    column => column.clone(),
                };
                (self.field_from_child(collection, name).to_string(), field)
            })
            .collect();
        published
    }

    fn relation(&self, collection: &str, relation: &RelationSchema) -> RelationSchema {
        let foreign = relation.foreign_collection();
        let local = |name: &str| self.field_from_child(collection, name).to_string();
        let remote = |name: &str| self.field_from_child(foreign, name).to_string();

        match relation {
            RelationSchema::ManyToOne {
                foreign_key,
                foreign_key_target,
                ..
            } => RelationSchema::ManyToOne {
                foreign_collection: self.collection(foreign).to_string(),
                foreign_key: local(foreign_key),
                foreign_key_target: remote(foreign_key_target),
            },
            RelationSchema::OneToOne {
                origin_key,
                origin_key_target,
                ..
            } => RelationSchema::OneToOne {
                foreign_collection: self.collection(foreign).to_string(),
                origin_key: remote(origin_key),
                origin_key_target: local(origin_key_target),
            },
            RelationSchema::OneToMany {
                origin_key,
                origin_key_target,
                ..
            } => RelationSchema::OneToMany {
                foreign_collection: self.collection(foreign).to_string(),
                origin_key: remote(origin_key),
                origin_key_target: local(origin_key_target),
            },
            RelationSchema::ManyToMany {
                through_collection,
                foreign_key,
                foreign_key_target,
                origin_key,
                origin_key_target,
                ..
            } => RelationSchema::ManyToMany {
                foreign_collection: self.collection(foreign).to_string(),
                through_collection: self.collection(through_collection).to_string(),
                foreign_key: self.field_from_child(through_collection, foreign_key).to_string(),
                foreign_key_target: remote(foreign_key_target),
                origin_key: self.field_from_child(through_collection, origin_key).to_string(),
                origin_key_target: local(origin_key_target),
            },
        }
    }
}

pub struct RenameCollection {
    child: CollectionRef,
    names: Arc<Names>,
    name: String,
    schema: CollectionSchema,
}

impl RenameCollection {
    fn new(child: CollectionRef, names: Arc<Names>) -> Self {
        let name = names.collection(child.name()).to_string();
        let schema = names.schema(child.name(), child.schema());

        Self {
            child,
            names,
            name,
            schema,
        }
    }

    fn child_name(&self) -> &str {
        self.child.name()
    }

    fn projection_to_child(&self, projection: &Projection) -> Result<Projection> {
        projection.try_replace(|path| {
            Ok(Some(self.names.path_to_child(self.child_name(), path)?))
        })
    }

    fn sort_to_child(&self, sort: &Sort) -> Result<Sort> {
        let clauses = sort
            .clauses()
            .iter()
            .map(|clause| {
                Ok(SortClause {
                    field: self.names.path_to_child(self.child_name(), &clause.field)?,
                    ascending: clause.ascending,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Sort::new(clauses))
    }

    fn aggregation_to_child(&self, aggregation: &Aggregation) -> Result<Aggregation> {
        let field = match &aggregation.field {
            Some(field) => Some(self.names.path_to_child(self.child_name(), field)?),
            None => None,
        };
        let groups = aggregation
            .groups
            .iter()
            .map(|group| {
                Ok(AggregationGroup {
                    field: self.names.path_to_child(self.child_name(), &group.field)?,
                    operation: group.operation,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Aggregation {
            operation: aggregation.operation,
            field,
            groups,
        })
    }

    fn from_child(&self, records: Vec<RecordData>) -> Vec<RecordData> {
        records
            .into_iter()
            .map(|record| self.names.record_from_child(self.child_name(), record))
            .collect()
    }
}

#[async_trait]
impl Collection for RenameCollection {
    fn name(&self) -> &str {
        &self.name
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
        let child_filter = self.names.filter_to_child(self.child_name(), &filter.filter)?;
        let child_filter = PaginatedFilter::new(child_filter)
            .with_sort(self.sort_to_child(&filter.sort)?)
            .with_page(filter.page.clone());
        let child_projection = self.projection_to_child(projection)?;

        let records = self.child.list(caller, &child_filter, &child_projection).await?;
        Ok(self.from_child(records))
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        let data = data
            .iter()
            .map(|record| self.names.record_to_child(self.child_name(), record))
            .collect::<Result<Vec<_>>>()?;
        let created = self.child.create(caller, data).await?;
        Ok(self.from_child(created))
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        let filter = self.names.filter_to_child(self.child_name(), filter)?;
        let patch = self.names.record_to_child(self.child_name(), patch)?;
        self.child.update(caller, &filter, &patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        let filter = self.names.filter_to_child(self.child_name(), filter)?;
        self.child.delete(caller, &filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let filter = self.names.filter_to_child(self.child_name(), filter)?;
        let aggregation = self.aggregation_to_child(aggregation)?;

        let results = self.child.aggregate(caller, &filter, &aggregation, limit).await?;
        Ok(results
            .into_iter()
            .map(|result| AggregateResult {
                value: result.value,
                group: result
                    .group
                    .into_iter()
                    .map(|(path, value)| {
                        (self.names.path_from_child(self.child_name(), &path), value)
                    })
                    .collect(),
            })
            .collect())
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        let filter = self.names.filter_to_child(self.child_name(), filter)?;
        self.child.execute(caller, name, form_values, &filter).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        form_values: Option<&RecordData>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        let filter = match filter {
            Some(filter) => Some(self.names.filter_to_child(self.child_name(), filter)?),
            None => None,
        };
        self.child
            .get_form(caller, name, form_values, filter.as_ref())
            .await
    }
}

/// Build a layer renaming `collections` (child name -> new name) and
/// `fields` (child collection -> child field -> new name)
pub(crate) fn layer(
    child: &Arc<Datasource>,
    collections: HashMap<String, String>,
    fields: HashMap<String, BTreeMap<String, String>>,
) -> Result<Arc<Datasource>> {
    for (from, to) in &collections {
        child.collection(from)?;
        let taken = child
            .names()
            .any(|name| name == to.as_str() && !collections.contains_key(name))
            || collections.iter().any(|(other, target)| other != from && target == to);
        if taken {
            return Err(DataError::validation(format!(
                "Cannot rename '{}' to '{}': the name is already used",
                from, to
            )));
        }
    }

    let mut field_names = HashMap::new();
    for (collection, renames) in fields {
        let schema = child.collection(&collection)?.schema();
        let mut names = FieldNames::default();

        for (from, to) in renames {
            field(schema, &collection, &from)?;
            let kept = schema.fields.contains_key(&to) && to != from;
            if kept || names.from_child.values().any(|target| target == &to) {
                return Err(DataError::validation(format!(
                    "Cannot rename '{}' of '{}' to '{}': the name is already used",
                    from, collection, to
                )));
            }
            debug!("Renaming '{}' of '{}' to '{}'", from, collection, to);
            names.to_child.insert(to.clone(), from.clone());
            names.from_child.insert(from, to);
        }
        field_names.insert(collection, names);
    }

    let names = Arc::new(Names {
        child: child.clone(),
        collections,
        fields: field_names,
    });

    let layer = wrap(child, |collection| {
        Ok(Some(
            Arc::new(RenameCollection::new(collection.clone(), names.clone())) as CollectionRef
        ))
    })?;
    layer.validate_relations()?;
    Ok(layer)
}
