//! Relations emulated over collections that cannot join natively.
//!
//! Relation fields in a projection are answered with one batched `In` query
//! per relation on the foreign collection, run concurrently, and stitched by
//! key. Filters on `relation:field` paths become `In` leaves on the local key
//! after listing the matching foreign keys. Sorts and aggregations reading
//! emulated relations run in memory.
//!
//! Foreign collections are siblings in the same layer, so multi-hop paths
//! are resolved one relation at a time.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use temps_query::record::{get_value, split_path, value_key};
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection, CollectionRef,
    CollectionSchema, ConditionTree, ConditionTreeLeaf, DataError, Datasource, Filter, Operator,
    PaginatedFilter, Projection, RecordData, RelationSchema, Result,
};
use tracing::debug;

use crate::layer::{check_depth, heads, request_paths};

/// A relation emulated by this layer, with its collections resolved to
/// positions in the layer
#[derive(Debug, Clone)]
struct EmulatedRelation {
    schema: RelationSchema,
    foreign: usize,
    through: Option<usize>,
}

/// Records related to each local key value, by `value_key`
type Related = HashMap<String, Vec<RecordData>>;

pub struct RelationCollection {
    child: CollectionRef,
    layer: Weak<Datasource>,
    relations: BTreeMap<String, EmulatedRelation>,
    max_depth: usize,
    schema: CollectionSchema,
}

impl RelationCollection {
    fn new(
        child: CollectionRef,
        layer: Weak<Datasource>,
        relations: BTreeMap<String, EmulatedRelation>,
        max_depth: usize,
    ) -> Self {
        let mut schema = child.schema().clone();
        for (name, relation) in &relations {
            schema = schema.with_field(name.clone(), relation.schema.clone());
        }

        Self {
            child,
            layer,
            relations,
            max_depth,
            schema,
        }
    }

    fn sibling(&self, index: usize) -> Result<CollectionRef> {
        let layer = self.layer.upgrade().ok_or_else(|| {
            DataError::internal(format!("Datasource of '{}' was dropped", self.name()))
        })?;
        layer
            .collection_at(index)
            .cloned()
            .ok_or_else(|| DataError::internal(format!("No collection at position {}", index)))
    }

    fn emulated(&self, path: &str) -> Option<(&str, &EmulatedRelation)> {
        let (head, _) = split_path(path);
        self.relations
            .get_key_value(head)
            .map(|(name, relation)| (name.as_str(), relation))
    }

    fn touches_relations<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> bool {
        heads(paths)
            .into_iter()
            .any(|head| self.relations.contains_key(head))
    }

    /// Projection sent to the child: emulated relation paths are replaced by
    /// the local keys needed to stitch them
    fn child_projection(&self, projection: &Projection) -> Projection {
        projection.replace(|path| match self.emulated(path) {
            Some((_, relation)) => vec![relation.schema.local_key().to_string()],
            None => vec![path.to_string()],
        })
    }

    async fn rewrite_filter(&self, caller: &Caller, filter: &Filter) -> Result<Filter> {
        let Some(tree) = &filter.condition_tree else {
            return Ok(filter.clone());
        };
        if !self.touches_relations(tree.projection().iter()) {
            return Ok(filter.clone());
        }

        let replacements = try_join_all(
            tree.leaves()
                .into_iter()
                .map(|leaf| self.rewrite_leaf(caller, leaf, &filter.timezone)),
        )
        .await?;

        Ok(filter
            .clone()
            .with_condition_tree(Some(tree.replace_leafs_in_order(replacements)?)))
    }

    /// Replace a leaf reading an emulated relation by a leaf on a local key
    async fn rewrite_leaf(
        &self,
        caller: &Caller,
        leaf: &ConditionTreeLeaf,
        timezone: &str,
    ) -> Result<ConditionTree> {
        let (name, relation) = match self.emulated(&leaf.field) {
            Some(found) => found,
            None => return Ok(leaf.clone().into()),
        };
        let rest = match split_path(&leaf.field).1 {
            Some(rest) => rest,
            None => {
                return Err(DataError::validation(format!(
                    "Cannot filter on relation '{}' itself, use one of its fields",
                    name
                )))
            }
        };

        let (select, local_key) = match &relation.schema {
            RelationSchema::ManyToOne {
                foreign_key,
                foreign_key_target,
                ..
            } => {
                if rest == foreign_key_target.as_str() {
                    return Ok(leaf.with_field(foreign_key.as_str()).into());
                }
                (foreign_key_target, foreign_key)
            }
            RelationSchema::OneToOne {
                origin_key,
                origin_key_target,
                ..
            } => (origin_key, origin_key_target),
            RelationSchema::OneToMany { .. } | RelationSchema::ManyToMany { .. } => {
                return Err(DataError::validation(format!(
                    "Cannot filter on '{}': '{}' is a to-many relation",
                    leaf.field, name
                )))
            }
        };

        debug!(
            "Resolving '{}' on '{}' through its relation '{}'",
            leaf.field,
            self.name(),
            name
        );
        let foreign = self.sibling(relation.foreign)?;
        let filter = PaginatedFilter::new(
            Filter::new()
                .with_timezone(timezone)
                .with_condition_tree(Some(leaf.with_field(rest).into())),
        );
        let records = foreign
            .list(caller, &filter, &Projection::new([select.as_str()]))
            .await?;

        let values = distinct_values(records.iter().map(|record| get_value(record, select)));
        Ok(ConditionTreeLeaf::new(local_key.as_str(), Operator::In, Value::Array(values)).into())
    }

    /// Fill every emulated relation of `projection` into `records`
    async fn stitch(
        &self,
        caller: &Caller,
        records: &mut [RecordData],
        projection: &Projection,
        timezone: &str,
    ) -> Result<()> {
        let relations: Vec<(String, Projection, &EmulatedRelation)> = projection
            .relations()
            .into_iter()
            .filter_map(|(name, sub_projection)| {
                self.relations
                    .get(&name)
                    .map(|relation| (name, sub_projection, relation))
            })
            .collect();
        if relations.is_empty() {
            return Ok(());
        }

        let fetched = {
            let records: &[RecordData] = records;
            try_join_all(relations.iter().map(|(_, sub_projection, relation)| {
                self.fetch_related(caller, records, relation, sub_projection, timezone)
            }))
            .await?
        };

        for ((name, sub_projection, relation), related) in relations.iter().zip(fetched) {
            let local_key = relation.schema.local_key();
            for record in records.iter_mut() {
                let key = get_value(record, local_key);
                let matches = if key.is_null() {
                    None
                } else {
                    related.get(&value_key(&key))
                };
                let value = if relation.schema.is_to_many() {
                    Value::Array(
                        matches
                            .map(|found| {
                                found
                                    .iter()
                                    .map(|r| Value::Object(sub_projection.apply_record(r)))
                                    .collect()
                            })
                            .unwrap_or_default(),
                    )
                } else {
                    matches
                        .and_then(|found| found.first())
                        .map(|r| Value::Object(sub_projection.apply_record(r)))
                        .unwrap_or(Value::Null)
                };
                record.insert(name.clone(), value);
            }
        }

        Ok(())
    }

    /// One batched query (two for many-to-many) for the records related to
    /// every parent
    async fn fetch_related(
        &self,
        caller: &Caller,
        records: &[RecordData],
        relation: &EmulatedRelation,
        projection: &Projection,
        timezone: &str,
    ) -> Result<Related> {
        let keys = distinct_values(
            records
                .iter()
                .map(|record| get_value(record, relation.schema.local_key())),
        );
        if keys.is_empty() {
            return Ok(Related::new());
        }

        let foreign = self.sibling(relation.foreign)?;
        let select = |field: &str, values: Vec<Value>| {
            PaginatedFilter::new(Filter::new().with_timezone(timezone).with_condition_tree(Some(
                ConditionTreeLeaf::new(field, Operator::In, Value::Array(values)).into(),
            )))
        };

        match &relation.schema {
            RelationSchema::ManyToOne {
                foreign_key_target, ..
            } => {
                let projection = projection.union(&Projection::new([foreign_key_target.as_str()]));
                let found = foreign
                    .list(caller, &select(foreign_key_target.as_str(), keys), &projection)
                    .await?;
                Ok(group_by(found, foreign_key_target))
            }
            RelationSchema::OneToOne { origin_key, .. }
            | RelationSchema::OneToMany { origin_key, .. } => {
                let projection = projection.union(&Projection::new([origin_key.as_str()]));
                let found = foreign
                    .list(caller, &select(origin_key.as_str(), keys), &projection)
                    .await?;
                Ok(group_by(found, origin_key))
            }
            RelationSchema::ManyToMany {
                foreign_key,
                foreign_key_target,
                origin_key,
                ..
            } => {
                let through_index = relation.through.ok_or_else(|| {
                    DataError::internal("Many-to-many relation without a through collection")
                })?;
                let through = self.sibling(through_index)?;
                let links = through
                    .list(
                        caller,
                        &select(origin_key.as_str(), keys),
                        &Projection::new([origin_key.as_str(), foreign_key.as_str()]),
                    )
                    .await?;

                let targets =
                    distinct_values(links.iter().map(|link| get_value(link, foreign_key)));
                if targets.is_empty() {
                    return Ok(Related::new());
                }
                let projection = projection.union(&Projection::new([foreign_key_target.as_str()]));
                let found = foreign
                    .list(caller, &select(foreign_key_target.as_str(), targets), &projection)
                    .await?;
                let by_target = group_by(found, foreign_key_target);

                let mut related = Related::new();
                for link in &links {
                    let origin = get_value(link, origin_key);
                    let target = get_value(link, foreign_key);
                    if origin.is_null() || target.is_null() {
                        continue;
                    }
                    if let Some(found) = by_target.get(&value_key(&target)) {
                        related
                            .entry(value_key(&origin))
                            .or_default()
                            .extend(found.iter().cloned());
                    }
                }
                Ok(related)
            }
        }
    }

    /// List with stitched relations, sorted and paginated in memory when the
    /// sort reads an emulated relation
    async fn list_stitched(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        let rewritten = self.rewrite_filter(caller, &filter.filter).await?;
        let timezone = filter.filter.timezone.as_str();

        let sort_paths = filter.sort.projection();
        if !self.touches_relations(sort_paths.iter()) {
            let child_filter = filter.clone().with_filter(rewritten);
            let mut records = self
                .child
                .list(caller, &child_filter, &self.child_projection(projection))
                .await?;
            self.stitch(caller, &mut records, projection, timezone).await?;
            return Ok(records);
        }

        for clause in filter.sort.clauses() {
            if let Some((name, relation)) = self.emulated(&clause.field) {
                if relation.schema.is_to_many() {
                    return Err(DataError::validation(format!(
                        "Cannot sort on '{}': '{}' is a to-many relation",
                        clause.field, name
                    )));
                }
            }
        }

        debug!("Sorting '{}' by related fields in memory", self.name());
        let needed = projection.union(&sort_paths);
        let child_filter = PaginatedFilter::new(rewritten);
        let mut records = self
            .child
            .list(caller, &child_filter, &self.child_projection(&needed))
            .await?;
        self.stitch(caller, &mut records, &needed, timezone).await?;

        let records = filter.sort.apply(records);
        Ok(match &filter.page {
            Some(page) => page.apply(records),
            None => records,
        })
    }
}

/// Non-null values without duplicates, in first-seen order
fn distinct_values(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_null() && seen.insert(value_key(value)))
        .collect()
}

fn group_by(records: Vec<RecordData>, key: &str) -> Related {
    let mut related = Related::new();
    for record in records {
        let value = get_value(&record, key);
        if !value.is_null() {
            related.entry(value_key(&value)).or_default().push(record);
        }
    }
    related
}

#[async_trait]
impl Collection for RelationCollection {
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
        check_depth(paths.iter().map(String::as_str), self.max_depth)?;

        if !self.touches_relations(paths.iter().map(String::as_str)) {
            return self.child.list(caller, filter, projection).await;
        }

        let records = self.list_stitched(caller, filter, projection).await?;
        Ok(projection.apply(records))
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        for record in &data {
            let written = record.keys().find(|key| self.relations.contains_key(key.as_str()));
            if let Some(name) = written {
                return Err(DataError::validation(format!(
                    "Cannot write relation '{}' of '{}'",
                    name,
                    self.name()
                )));
            }
        }
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        if let Some(name) = patch.keys().find(|key| self.relations.contains_key(key.as_str())) {
            return Err(DataError::validation(format!(
                "Cannot write relation '{}' of '{}'",
                name,
                self.name()
            )));
        }
        let filter = self.rewrite_filter(caller, filter).await?;
        self.child.update(caller, &filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        let filter = self.rewrite_filter(caller, filter).await?;
        self.child.delete(caller, &filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let fields = aggregation.projection();
        check_depth(fields.iter(), self.max_depth)?;

        if !self.touches_relations(fields.iter()) {
            let filter = self.rewrite_filter(caller, filter).await?;
            return self.child.aggregate(caller, &filter, aggregation, limit).await;
        }

        debug!("Aggregating '{}' over related fields in memory", self.name());
        let records = self
            .list(caller, &PaginatedFilter::new(filter.clone()), &fields)
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
        let filter = self.rewrite_filter(caller, filter).await?;
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
            Some(filter) => Some(self.rewrite_filter(caller, filter).await?),
            None => None,
        };
        self.child
            .get_form(caller, name, form_values, filter.as_ref())
            .await
    }
}

fn position(child: &Datasource, name: &str, relation: &str) -> Result<usize> {
    child.collection_index(name).ok_or_else(|| {
        DataError::validation(format!(
            "Relation '{}' targets unknown collection '{}'",
            relation, name
        ))
    })
}

/// Build a layer emulating `relations` (collection, name, schema) over
/// `child`. Key columns are checked once the layer exists.
pub(crate) fn layer(
    child: &Arc<Datasource>,
    relations: Vec<(String, String, RelationSchema)>,
    max_depth: usize,
) -> Result<Arc<Datasource>> {
    let mut by_collection: HashMap<String, BTreeMap<String, EmulatedRelation>> = HashMap::new();

    for (collection, name, schema) in relations {
        let taken = child.collection(&collection)?.schema().field(&name).is_some()
            || by_collection
                .get(&collection)
                .is_some_and(|relations| relations.contains_key(&name));
        if taken {
            return Err(DataError::validation(format!(
                "Field '{}' already exists on '{}'",
                name, collection
            )));
        }

        let qualified = format!("{}.{}", collection, name);
        let foreign = position(child, schema.foreign_collection(), &qualified)?;
        let through = schema
            .through_collection()
            .map(|through| position(child, through, &qualified))
            .transpose()?;

        debug!("Emulating relation '{}'", qualified);
        by_collection.entry(collection).or_default().insert(
            name,
            EmulatedRelation {
                schema,
                foreign,
                through,
            },
        );
    }

    let layer = Arc::new_cyclic(|weak: &Weak<Datasource>| {
        let collections = child
            .collections()
            .iter()
            .map(|collection| {
                let relations = by_collection.remove(collection.name()).unwrap_or_default();
                Arc::new(RelationCollection::new(
                    collection.clone(),
                    weak.clone(),
                    relations,
                    max_depth,
                )) as CollectionRef
            })
            .collect();
        child.wrap_collections(collections)
    });

    layer.validate_relations()?;
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use temps_query::{ColumnSchema, ColumnType, Sort, SortClause};
    use temps_query_memory::MemoryCollection;

    fn key() -> ColumnSchema {
        ColumnSchema::new(ColumnType::Number).with_operators([Operator::Equal, Operator::In])
    }

    fn name() -> ColumnSchema {
        ColumnSchema::new(ColumnType::String).with_operators([Operator::Equal])
    }

    struct Library {
        publishers: Arc<MemoryCollection>,
        authors: Arc<MemoryCollection>,
        books: Arc<MemoryCollection>,
        tags: Arc<MemoryCollection>,
        book_tags: Arc<MemoryCollection>,
        layer: Arc<Datasource>,
    }

    fn library() -> Library {
        let publishers = Arc::new(
            MemoryCollection::new(
                "publishers",
                CollectionSchema::new()
                    .with_field("id", key().primary_key())
                    .with_field("name", name()),
            )
            .with_records(vec![
                json!({"id": 1, "name": "Chilton"}),
                json!({"id": 2, "name": "Parnassus"}),
            ]),
        );
        let authors = Arc::new(
            MemoryCollection::new(
                "authors",
                CollectionSchema::new()
                    .with_field("id", key().primary_key())
                    .with_field("publisherId", key())
                    .with_field("name", name()),
            )
            .with_records(vec![
                json!({"id": 1, "publisherId": 1, "name": "Herbert"}),
                json!({"id": 2, "publisherId": 2, "name": "Le Guin"}),
                json!({"id": 3, "publisherId": null, "name": "Banks"}),
            ]),
        );
        let books = Arc::new(
            MemoryCollection::new(
                "books",
                CollectionSchema::new()
                    .with_field("id", key().primary_key())
                    .with_field("authorId", key())
                    .with_field("title", name()),
            )
            .with_records(vec![
                json!({"id": 10, "authorId": 1, "title": "Dune"}),
                json!({"id": 11, "authorId": 2, "title": "Earthsea"}),
                json!({"id": 12, "authorId": 1, "title": "Destination: Void"}),
                json!({"id": 13, "authorId": null, "title": "Anonymous"}),
            ]),
        );
        let tags = Arc::new(
            MemoryCollection::new(
                "tags",
                CollectionSchema::new()
                    .with_field("id", key().primary_key())
                    .with_field("label", name()),
            )
            .with_records(vec![
                json!({"id": 100, "label": "sf"}),
                json!({"id": 101, "label": "classic"}),
            ]),
        );
        let book_tags = Arc::new(
            MemoryCollection::new(
                "bookTags",
                CollectionSchema::new()
                    .with_field("bookId", key().primary_key())
                    .with_field("tagId", key().primary_key()),
            )
            .with_records(vec![
                json!({"bookId": 10, "tagId": 100}),
                json!({"bookId": 10, "tagId": 101}),
                json!({"bookId": 11, "tagId": 100}),
            ]),
        );

        let child = Arc::new(
            Datasource::new(vec![
                publishers.clone() as CollectionRef,
                authors.clone() as CollectionRef,
                books.clone() as CollectionRef,
                tags.clone() as CollectionRef,
                book_tags.clone() as CollectionRef,
            ])
            .unwrap(),
        );
        let layer = layer(
            &child,
            vec![
                (
                    "books".into(),
                    "author".into(),
                    RelationSchema::ManyToOne {
                        foreign_collection: "authors".into(),
                        foreign_key: "authorId".into(),
                        foreign_key_target: "id".into(),
                    },
                ),
                (
                    "authors".into(),
                    "publisher".into(),
                    RelationSchema::ManyToOne {
                        foreign_collection: "publishers".into(),
                        foreign_key: "publisherId".into(),
                        foreign_key_target: "id".into(),
                    },
                ),
                (
                    "authors".into(),
                    "books".into(),
                    RelationSchema::OneToMany {
                        foreign_collection: "books".into(),
                        origin_key: "authorId".into(),
                        origin_key_target: "id".into(),
                    },
                ),
                (
                    "books".into(),
                    "tags".into(),
                    RelationSchema::ManyToMany {
                        foreign_collection: "tags".into(),
                        through_collection: "bookTags".into(),
                        foreign_key: "tagId".into(),
                        foreign_key_target: "id".into(),
                        origin_key: "bookId".into(),
                        origin_key_target: "id".into(),
                    },
                ),
            ],
            3,
        )
        .unwrap();

        Library {
            publishers,
            authors,
            books,
            tags,
            book_tags,
            layer,
        }
    }

    fn where_leaf(field: &str, operator: Operator, value: Value) -> PaginatedFilter {
        let tree: ConditionTree = ConditionTreeLeaf::new(field, operator, value).into();
        PaginatedFilter::new(Filter::new().with_condition_tree(Some(tree)))
    }

    #[tokio::test]
    async fn test_stitch_many_to_one() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let records = books
            .list(
                &Caller::system(),
                &PaginatedFilter::default(),
                &Projection::new(["title", "author:name"]),
            )
            .await
            .unwrap();

        let expected = json!({"title": "Dune", "author": {"name": "Herbert"}});
        assert_eq!(Value::Object(records[0].clone()), expected);
        assert_eq!(records[3]["author"], Value::Null);
        assert_eq!(library.authors.list_count(), 1);
    }

    #[tokio::test]
    async fn test_one_to_many_uses_one_batched_fetch() {
        let library = library();
        let authors = library.layer.collection("authors").unwrap();
        let records = authors
            .list(
                &Caller::system(),
                &PaginatedFilter::default(),
                &Projection::new(["name", "books:title"]),
            )
            .await
            .unwrap();

        assert_eq!(records[0]["books"], json!([{"title": "Dune"}, {"title": "Destination: Void"}]));
        assert_eq!(records[2]["books"], json!([]));
        assert_eq!(library.books.list_count(), 1);

        let calls = library.books.calls();
        let temps_query_memory::Call::List { filter, .. } = &calls[0] else {
            panic!("expected a list call");
        };
        assert_eq!(
            filter.filter.condition_tree,
            Some(ConditionTreeLeaf::new("authorId", Operator::In, json!([1, 2, 3])).into())
        );
    }

    #[tokio::test]
    async fn test_stitch_many_to_many() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let records = books
            .list(
                &Caller::system(),
                &where_leaf("id", Operator::In, json!([10, 11, 12])),
                &Projection::new(["title", "tags:label"]),
            )
            .await
            .unwrap();

        assert_eq!(records[0]["tags"], json!([{"label": "sf"}, {"label": "classic"}]));
        assert_eq!(records[1]["tags"], json!([{"label": "sf"}]));
        assert_eq!(records[2]["tags"], json!([]));
        assert_eq!(library.book_tags.list_count(), 1);
        assert_eq!(library.tags.list_count(), 1);
    }

    #[tokio::test]
    async fn test_filter_through_relation() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let records = books
            .list(
                &Caller::system(),
                &where_leaf("author:name", Operator::Equal, json!("Herbert")),
                &Projection::new(["id"]),
            )
            .await
            .unwrap();

        let ids: Vec<Value> = records.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(10), json!(12)]);
    }

    #[tokio::test]
    async fn test_filter_through_two_relations() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let records = books
            .list(
                &Caller::system(),
                &where_leaf("author:publisher:name", Operator::Equal, json!("Chilton")),
                &Projection::new(["id"]),
            )
            .await
            .unwrap();

        let ids: Vec<Value> = records.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(10), json!(12)]);
        assert_eq!(library.publishers.list_count(), 1);
        assert_eq!(library.authors.list_count(), 1);

        let calls = library.authors.calls();
        let temps_query_memory::Call::List { filter, .. } = &calls[0] else {
            panic!("expected a list call");
        };
        assert_eq!(
            filter.filter.condition_tree,
            Some(ConditionTreeLeaf::new("publisherId", Operator::In, json!([1])).into())
        );
    }

    #[tokio::test]
    async fn test_filter_on_relation_key_needs_no_query() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let records = books
            .list(
                &Caller::system(),
                &where_leaf("author:id", Operator::Equal, json!(2)),
                &Projection::new(["title"]),
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(library.authors.list_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_through_to_many_fails() {
        let library = library();
        let authors = library.layer.collection("authors").unwrap();
        let error = authors
            .list(
                &Caller::system(),
                &where_leaf("books:title", Operator::Equal, json!("Dune")),
                &Projection::new(["id"]),
            )
            .await
            .unwrap_err();
        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn test_sort_by_related_field() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let filter = where_leaf("id", Operator::In, json!([10, 11, 12]))
            .with_sort(Sort::new(vec![
                SortClause::ascending("author:name"),
                SortClause::descending("id"),
            ]));
        let records = books
            .list(&Caller::system(), &filter, &Projection::new(["id"]))
            .await
            .unwrap();

        let ids: Vec<Value> = records.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(12), json!(10), json!(11)]);
        assert_eq!(records[0], json!({"id": 12}).as_object().cloned().unwrap());
    }

    #[tokio::test]
    async fn test_aggregate_by_related_field() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let aggregation =
            Aggregation::count().with_group(temps_query::AggregationGroup::new("author:name"));
        let results = books
            .aggregate(&Caller::system(), &Filter::new(), &aggregation, None)
            .await
            .unwrap();

        assert_eq!(results[0].value, json!(2));
        assert_eq!(results[0].group["author:name"], json!("Herbert"));
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let library = library();
        let books = library.layer.collection("books").unwrap();
        let error = books
            .list(
                &Caller::system(),
                &PaginatedFilter::default(),
                &Projection::new(["author:books:author:books:title"]),
            )
            .await
            .unwrap_err();
        assert!(error.is_validation());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let library = library();
        let child = Arc::new(
            Datasource::new(vec![
                library.publishers.clone() as CollectionRef,
                library.authors.clone() as CollectionRef,
                library.books.clone() as CollectionRef,
            ])
            .unwrap(),
        );
        let result = layer(
            &child,
            vec![(
                "books".into(),
                "writer".into(),
                RelationSchema::ManyToOne {
                    foreign_collection: "authors".into(),
                    foreign_key: "writerId".into(),
                    foreign_key_target: "id".into(),
                },
            )],
            3,
        );
        assert!(result.unwrap_err().is_validation());
    }
}
