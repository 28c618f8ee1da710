//! Helpers shared by decorator layers.

use std::collections::BTreeSet;
use std::sync::Arc;

use temps_query::query::condition_tree::equivalence::resolve;
use temps_query::record::{path_depth, split_path};
use temps_query::{
    factory, CollectionRef, CollectionSchema, ConditionTree, DataError, Datasource, EvalContext,
    FieldSchema, PaginatedFilter, Projection, RecordData, Result,
};

/// Wrap every collection of `child` into a new layer.
///
/// `decorate` returns `None` to drop a collection from the layer.
pub(crate) fn wrap<F>(child: &Arc<Datasource>, mut decorate: F) -> Result<Arc<Datasource>>
where
    F: FnMut(&CollectionRef) -> Result<Option<CollectionRef>>,
{
    let mut collections = Vec::with_capacity(child.collections().len());
    for collection in child.collections() {
        if let Some(decorated) = decorate(collection)? {
            collections.push(decorated);
        }
    }
    Ok(Arc::new(Datasource::new_unchecked(collections)?))
}

/// Reject paths crossing more relations than allowed
pub(crate) fn check_depth<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    max_depth: usize,
) -> Result<()> {
    for path in paths {
        if path_depth(path) > max_depth {
            return Err(DataError::validation(format!(
                "Field '{}' crosses more than {} relations",
                path, max_depth
            )));
        }
    }
    Ok(())
}

/// Every path a paginated request reads
pub(crate) fn request_paths(filter: &PaginatedFilter, projection: &Projection) -> Vec<String> {
    let mut paths: Vec<String> = projection.iter().map(str::to_string).collect();
    if let Some(tree) = &filter.filter.condition_tree {
        paths.extend(tree.projection().iter().map(str::to_string));
    }
    paths.extend(filter.sort.projection().iter().map(str::to_string));
    paths
}

/// First segment of every path
pub(crate) fn heads<'a>(paths: impl IntoIterator<Item = &'a str>) -> BTreeSet<&'a str> {
    paths.into_iter().map(|path| split_path(path).0).collect()
}

/// Split a tree into the top-level conjuncts `push` accepts and the rest
pub(crate) fn split_conjuncts<F>(
    tree: Option<&ConditionTree>,
    mut push: F,
) -> (Option<ConditionTree>, Option<ConditionTree>)
where
    F: FnMut(&ConditionTree) -> bool,
{
    let Some(tree) = tree else {
        return (None, None);
    };

    let conjuncts = match tree {
        ConditionTree::Branch(branch)
            if branch.aggregator == temps_query::Aggregator::And =>
        {
            branch.conditions.clone()
        }
        other => vec![other.clone()],
    };

    let (pushed, kept): (Vec<_>, Vec<_>) = conjuncts.into_iter().partition(|c| push(c));
    let build = |conditions: Vec<ConditionTree>| match conditions.len() {
        0 => None,
        1 => conditions.into_iter().next(),
        _ => Some(ConditionTree::and(conditions)),
    };
    (build(pushed), build(kept))
}

/// Primary key match of `records`, using only operators `schema` supports
pub(crate) fn key_match(
    schema: &CollectionSchema,
    collection: &str,
    records: &[RecordData],
    ctx: &EvalContext,
) -> Result<ConditionTree> {
    factory::match_records(schema, records)?.try_replace_leafs(|leaf| {
        let column = schema.column(&leaf.field)?;
        resolve(leaf.operator, &column.filter_operators, &column.column_type)
            .ok_or_else(|| {
                DataError::validation(format!(
                    "Primary key '{}' of '{}' must support Equal or In",
                    leaf.field, collection
                ))
            })?
            .apply(leaf, &column.column_type, ctx)
    })
}

/// Schema field, failing with a validation error when unknown
pub(crate) fn field<'a>(
    schema: &'a CollectionSchema,
    collection: &str,
    name: &str,
) -> Result<&'a FieldSchema> {
    schema.field(name).ok_or_else(|| {
        DataError::validation(format!(
            "Field '{}' not found on '{}'",
            name, collection
        ))
    })
}

/// Object values found at a relation prefix of each record, in record order.
/// To-many relations contribute every element, null relations nothing.
pub(crate) fn nested_records(records: &[RecordData], prefix: &[String]) -> Vec<RecordData> {
    let mut found = Vec::new();
    for record in records {
        collect_nested(record, prefix, &mut found);
    }
    found
}

fn collect_nested(record: &RecordData, prefix: &[String], found: &mut Vec<RecordData>) {
    let Some((head, rest)) = prefix.split_first() else {
        found.push(record.clone());
        return;
    };

    match record.get(head) {
        Some(serde_json::Value::Object(nested)) => collect_nested(nested, rest, found),
        Some(serde_json::Value::Array(items)) => {
            for item in items {
                if let serde_json::Value::Object(nested) = item {
                    collect_nested(nested, rest, found);
                }
            }
        }
        _ => {}
    }
}

/// Visit the same objects as [`nested_records`], in the same order
pub(crate) fn visit_nested<F>(records: &mut [RecordData], prefix: &[String], visit: &mut F)
where
    F: FnMut(&mut RecordData),
{
    for record in records.iter_mut() {
        visit_nested_record(record, prefix, visit);
    }
}

fn visit_nested_record<F>(record: &mut RecordData, prefix: &[String], visit: &mut F)
where
    F: FnMut(&mut RecordData),
{
    let Some((head, rest)) = prefix.split_first() else {
        visit(record);
        return;
    };

    match record.get_mut(head) {
        Some(serde_json::Value::Object(nested)) => visit_nested_record(nested, rest, visit),
        Some(serde_json::Value::Array(items)) => {
            for item in items.iter_mut() {
                if let serde_json::Value::Object(nested) = item {
                    visit_nested_record(nested, rest, visit);
                }
            }
        }
        _ => {}
    }
}
