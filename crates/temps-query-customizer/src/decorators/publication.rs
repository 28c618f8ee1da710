//! Hides collections and fields.
//!
//! A relation is hidden along with the collections it reaches and the
//! columns it joins on. Requests naming a hidden field, directly or through
//! a relation path, are rejected as if the field did not exist.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use temps_query::record::split_path;
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection, CollectionRef,
    CollectionSchema, DataError, Datasource, FieldSchema, Filter, PaginatedFilter, Projection,
    RecordData, RelationSchema, Result,
};
use tracing::debug;

use crate::layer::{field, request_paths, wrap};

/// Published schemas of every visible collection, shared by the layer
struct Published {
    schemas: HashMap<String, CollectionSchema>,
}

impl Published {
    fn check_path(&self, collection: &str, path: &str) -> Result<()> {
        let schema = self.schemas.get(collection).ok_or_else(|| {
            DataError::not_found(format!("Collection '{}' not found", collection))
        })?;
        let (head, rest) = split_path(path);

        match (field(schema, collection, head)?, rest) {
            (_, None) => Ok(()),
            (FieldSchema::Relation(relation), Some(rest)) => {
                self.check_path(relation.foreign_collection(), rest)
            }
            (FieldSchema::Column(_), Some(_)) => Err(DataError::validation(format!(
                "Field '{}' of '{}' is not a relation",
                head, collection
            ))),
        }
    }

    fn check_paths<'a>(
        &self,
        collection: &str,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        paths
            .into_iter()
            .try_for_each(|path| self.check_path(collection, path))
    }

    fn check_filter(&self, collection: &str, filter: &Filter) -> Result<()> {
        match &filter.condition_tree {
            Some(tree) => self.check_paths(collection, tree.projection().iter()),
            None => Ok(()),
        }
    }
}

pub struct PublicationCollection {
    child: CollectionRef,
    published: Arc<Published>,
    schema: CollectionSchema,
}

impl PublicationCollection {
    fn new(child: CollectionRef, published: Arc<Published>) -> Self {
        let schema = published
            .schemas
            .get(child.name())
            .cloned()
            .unwrap_or_default();

        Self {
            child,
            published,
            schema,
        }
    }

    fn check_record(&self, record: &RecordData) -> Result<()> {
        self.published
            .check_paths(self.name(), record.keys().map(String::as_str))
    }

    fn strip(&self, mut record: RecordData) -> RecordData {
        record.retain(|name, _| self.schema.fields.contains_key(name));
        record
    }
}

#[async_trait]
impl Collection for PublicationCollection {
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
        let paths = request_paths(filter, projection);
        self.published
            .check_paths(self.name(), paths.iter().map(String::as_str))?;
        self.child.list(caller, filter, projection).await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        for record in &data {
            self.check_record(record)?;
        }
        let created = self.child.create(caller, data).await?;
        Ok(created.into_iter().map(|record| self.strip(record)).collect())
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        self.published.check_filter(self.name(), filter)?;
        self.check_record(patch)?;
        self.child.update(caller, filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        self.published.check_filter(self.name(), filter)?;
        self.child.delete(caller, filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        self.published.check_filter(self.name(), filter)?;
        self.published
            .check_paths(self.name(), aggregation.projection().iter())?;
        self.child.aggregate(caller, filter, aggregation, limit).await
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        self.published.check_filter(self.name(), filter)?;
        self.child.execute(caller, name, form_values, filter).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        form_values: Option<&RecordData>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        if let Some(filter) = filter {
            self.published.check_filter(self.name(), filter)?;
        }
        self.child.get_form(caller, name, form_values, filter).await
    }
}

/// Whether a relation reaches a hidden collection or joins on a hidden column
fn relation_is_hidden(
    collection: &str,
    relation: &RelationSchema,
    hidden_collections: &BTreeSet<String>,
    hidden_fields: &HashMap<String, BTreeSet<String>>,
) -> bool {
    let is_hidden = |collection: &str, field: &str| {
        hidden_fields
            .get(collection)
            .is_some_and(|fields| fields.contains(field))
    };
    if hidden_collections.contains(relation.foreign_collection()) {
        return true;
    }
    let foreign = relation.foreign_collection();

    match relation {
        RelationSchema::ManyToOne {
            foreign_key,
            foreign_key_target,
            ..
        } => is_hidden(collection, foreign_key) || is_hidden(foreign, foreign_key_target),
        RelationSchema::OneToOne {
            origin_key,
            origin_key_target,
            ..
        }
        | RelationSchema::OneToMany {
            origin_key,
            origin_key_target,
            ..
        } => is_hidden(foreign, origin_key) || is_hidden(collection, origin_key_target),
        RelationSchema::ManyToMany {
            through_collection,
            foreign_key,
            foreign_key_target,
            origin_key,
            origin_key_target,
            ..
        } => {
            hidden_collections.contains(through_collection)
                || is_hidden(through_collection, foreign_key)
                || is_hidden(through_collection, origin_key)
                || is_hidden(foreign, foreign_key_target)
                || is_hidden(collection, origin_key_target)
        }
    }
}

/// Build a layer hiding `hidden_collections` and `hidden_fields`
/// (collection -> field names)
pub(crate) fn layer(
    child: &Arc<Datasource>,
    hidden_collections: BTreeSet<String>,
    hidden_fields: HashMap<String, BTreeSet<String>>,
) -> Result<Arc<Datasource>> {
    for collection in &hidden_collections {
        child.collection(collection)?;
    }
    for (collection, fields) in &hidden_fields {
        let schema = child.collection(collection)?.schema();
        for name in fields {
            if let FieldSchema::Column(column) = field(schema, collection, name)? {
                if column.is_primary_key {
                    return Err(DataError::validation(format!(
                        "Primary key '{}' of '{}' cannot be hidden",
                        name, collection
                    )));
                }
            }
        }
    }

    let mut schemas = HashMap::new();
    for collection in child.collections() {
        let name = collection.name();
        if hidden_collections.contains(name) {
            continue;
        }

        let mut schema = collection.schema().clone();
        schema.fields.retain(|field_name, field| {
            let hidden = hidden_fields
                .get(name)
                .is_some_and(|fields| fields.contains(field_name))
                || matches!(field, FieldSchema::Relation(relation)
                    if relation_is_hidden(name, relation, &hidden_collections, &hidden_fields));
            if hidden {
                debug!("Hiding '{}' of '{}'", field_name, name);
            }
            !hidden
        });
        schemas.insert(name.to_string(), schema);
    }
    let published = Arc::new(Published { schemas });

    wrap(child, |collection| {
        if hidden_collections.contains(collection.name()) {
            return Ok(None);
        }
        Ok(Some(Arc::new(PublicationCollection::new(
            collection.clone(),
            published.clone(),
        )) as CollectionRef))
    })
}
