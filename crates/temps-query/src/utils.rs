//! Helpers resolving field paths and relations across a datasource.

use serde_json::Value;

use crate::error::{DataError, Result};
use crate::query::aggregation::{AggregateResult, Aggregation};
use crate::query::condition_tree::{factory, ConditionTree, ConditionTreeLeaf};
use crate::query::filter::{Filter, PaginatedFilter};
use crate::query::operator::Operator;
use crate::query::projection::Projection;
use crate::record::{get_value, split_path};
use crate::registry::Datasource;
use crate::schema::{CollectionSchema, ColumnSchema, FieldSchema, RelationSchema};
use crate::types::{Caller, RecordData};

/// Column reached by a path, with whether the path crosses a to-many relation
pub struct ResolvedColumn<'a> {
    pub column: &'a ColumnSchema,
    pub through_to_many: bool,
}

/// Follow `path` from `schema` through relations to the column it names.
///
/// Without a datasource only local columns can be resolved.
pub fn resolve_column<'a>(
    datasource: Option<&'a Datasource>,
    schema: &'a CollectionSchema,
    path: &str,
) -> Result<ResolvedColumn<'a>> {
    match split_path(path) {
        (field, None) => Ok(ResolvedColumn {
            column: schema.column(field)?,
            through_to_many: false,
        }),
        (prefix, Some(rest)) => {
            let relation = match schema.field(prefix) {
                Some(FieldSchema::Relation(relation)) => relation,
                _ => {
                    return Err(DataError::validation(format!(
                        "Relation not found: '{}' in path '{}'",
                        prefix, path
                    )))
                }
            };
            let datasource = datasource.ok_or_else(|| {
                DataError::validation(format!("Cannot resolve relation path '{}'", path))
            })?;

            let foreign = datasource.collection(relation.foreign_collection())?;
            let resolved = resolve_column(Some(datasource), foreign.schema(), rest)?;
            Ok(ResolvedColumn {
                column: resolved.column,
                through_to_many: resolved.through_to_many || relation.is_to_many(),
            })
        }
    }
}

/// Add primary keys of the collection and of every projected relation
pub fn projection_with_pks(
    datasource: &Datasource,
    schema: &CollectionSchema,
    projection: &Projection,
) -> Result<Projection> {
    let mut result = projection.with_pks(schema);

    for (relation_name, sub_projection) in projection.relations() {
        let relation = schema.relation(&relation_name)?;
        let foreign = datasource.collection(relation.foreign_collection())?;
        let nested = projection_with_pks(datasource, foreign.schema(), &sub_projection)?;
        result = result.union(&nested.nest(&relation_name));
    }

    Ok(result)
}

/// Condition selecting the records related to `parent` on the foreign side.
/// None when the parent's key is null (nothing is related).
async fn relation_condition(
    datasource: &Datasource,
    caller: &Caller,
    relation: &RelationSchema,
    parent: &RecordData,
) -> Result<Option<ConditionTree>> {
    let local_value = get_value(parent, relation.local_key());
    if local_value.is_null() {
        return Ok(None);
    }

    let tree = match relation {
        RelationSchema::ManyToOne {
            foreign_key_target,
            ..
        } => {
            ConditionTreeLeaf::new(foreign_key_target.as_str(), Operator::Equal, local_value).into()
        }
        RelationSchema::OneToOne { origin_key, .. }
        | RelationSchema::OneToMany { origin_key, .. } => {
            ConditionTreeLeaf::new(origin_key.as_str(), Operator::Equal, local_value).into()
        }
        RelationSchema::ManyToMany {
            through_collection,
            foreign_key,
            foreign_key_target,
            origin_key,
            ..
        } => {
            let through = datasource.collection(through_collection)?;
            let filter = PaginatedFilter::new(Filter::new().with_condition_tree(Some(
                ConditionTreeLeaf::new(origin_key.as_str(), Operator::Equal, local_value).into(),
            )));
            let links = through
                .list(caller, &filter, &Projection::new([foreign_key.as_str()]))
                .await?;
            let values: Vec<Value> = links
                .iter()
                .map(|link| get_value(link, foreign_key))
                .filter(|value| !value.is_null())
                .collect();

            ConditionTreeLeaf::new(
                foreign_key_target.as_str(),
                Operator::In,
                Value::Array(values),
            )
            .into()
        }
    };

    Ok(Some(tree))
}

/// List the records on the other side of `relation_name` for one parent record.
/// The parent must contain the relation's local key.
#[allow(clippy::too_many_arguments)]
pub async fn list_relation(
    datasource: &Datasource,
    collection: &str,
    relation_name: &str,
    parent: &RecordData,
    caller: &Caller,
    filter: &PaginatedFilter,
    projection: &Projection,
) -> Result<Vec<RecordData>> {
    let schema = datasource.collection(collection)?.schema();
    let relation = schema.relation(relation_name)?;
    let foreign = datasource.collection(relation.foreign_collection())?;

    let Some(condition) = relation_condition(datasource, caller, relation, parent).await? else {
        return Ok(Vec::new());
    };

    let tree = factory::intersect(vec![filter.filter.condition_tree.clone(), Some(condition)]);
    foreign
        .list(caller, &filter.clone().with_condition_tree(tree), projection)
        .await
}

/// Aggregate the records on the other side of `relation_name` for one parent record
#[allow(clippy::too_many_arguments)]
pub async fn aggregate_relation(
    datasource: &Datasource,
    collection: &str,
    relation_name: &str,
    parent: &RecordData,
    caller: &Caller,
    filter: &Filter,
    aggregation: &Aggregation,
    limit: Option<usize>,
) -> Result<Vec<AggregateResult>> {
    let schema = datasource.collection(collection)?.schema();
    let relation = schema.relation(relation_name)?;
    let foreign = datasource.collection(relation.foreign_collection())?;

    let Some(condition) = relation_condition(datasource, caller, relation, parent).await? else {
        return Ok(aggregation.apply(&[], filter.eval_context()?.timezone, limit));
    };

    let tree = factory::intersect(vec![filter.condition_tree.clone(), Some(condition)]);
    foreign
        .aggregate(caller, &filter.clone().with_condition_tree(tree), aggregation, limit)
        .await
}
