//! Free-text search over collections that cannot search natively.
//!
//! The search string becomes an `Or` of one leaf per searchable column,
//! intersected with the caller's condition tree.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use temps_query::record::number_value;
use temps_query::{
    factory, ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection,
    CollectionRef, CollectionSchema, ColumnSchema, ColumnType, ConditionTree, ConditionTreeLeaf,
    Datasource, Filter, Operator, PaginatedFilter, Projection, RecordData, RelationSchema, Result,
};
use tracing::debug;

use crate::layer::wrap;

/// Builds the condition a search string stands for. Receives the trimmed
/// search and whether the caller asked for an extended search.
pub type SearchHandler = Arc<dyn Fn(&str, bool) -> Result<ConditionTree> + Send + Sync>;

pub struct SearchCollection {
    child: CollectionRef,
    child_datasource: Arc<Datasource>,
    handler: Option<SearchHandler>,
    extended_depth: usize,
    schema: CollectionSchema,
}

impl SearchCollection {
    pub fn new(
        child: CollectionRef,
        child_datasource: Arc<Datasource>,
        handler: Option<SearchHandler>,
        extended_depth: usize,
    ) -> Self {
        let schema = child.schema().clone().searchable();
        Self {
            child,
            child_datasource,
            handler,
            extended_depth,
            schema,
        }
    }

    fn rewrite_filter(&self, filter: &Filter) -> Result<Filter> {
        let Some(search) = &filter.search else {
            return Ok(filter.clone());
        };

        let search = search.trim();
        if search.is_empty() {
            return Ok(filter.clone().with_search(None).with_search_extended(false));
        }
        if self.handler.is_none() && self.child.schema().searchable {
            return Ok(filter.clone());
        }

        let condition = match &self.handler {
            Some(handler) => handler(search, filter.search_extended)?,
            None => self.default_condition(search, filter.search_extended),
        };
        debug!("Searching '{}' on '{}' with a condition tree", search, self.name());

        Ok(filter
            .clone()
            .with_condition_tree(factory::intersect(vec![
                filter.condition_tree.clone(),
                Some(condition),
            ]))
            .with_search(None)
            .with_search_extended(false))
    }

    fn default_condition(&self, search: &str, extended: bool) -> ConditionTree {
        let depth = if extended { self.extended_depth } else { 0 };
        let mut conditions = Vec::new();
        self.collect_conditions(self.child.schema(), "", depth, search, &mut conditions);

        if conditions.is_empty() {
            factory::match_none()
        } else {
            ConditionTree::or(conditions)
        }
    }

    fn collect_conditions(
        &self,
        schema: &CollectionSchema,
        prefix: &str,
        depth: usize,
        search: &str,
        conditions: &mut Vec<ConditionTree>,
    ) {
        for (name, column) in schema.columns() {
            let path = format!("{}{}", prefix, name);
            if let Some(condition) = column_condition(&path, column, search) {
                conditions.push(condition);
            }
        }

        if depth == 0 {
            return;
        }
        for (name, relation) in schema.relations() {
            if !matches!(
                relation,
                RelationSchema::ManyToOne { .. } | RelationSchema::OneToOne { .. }
            ) {
                continue;
            }
            let Ok(foreign) = self.child_datasource.collection(relation.foreign_collection()) else {
                continue;
            };
            let nested = format!("{}{}:", prefix, name);
            self.collect_conditions(foreign.schema(), &nested, depth - 1, search, conditions);
        }
    }
}

/// Leaf searching `search` in one column, if the column type can hold it
fn column_condition(path: &str, column: &ColumnSchema, search: &str) -> Option<ConditionTree> {
    let supports = |operator| column.filter_operators.contains(&operator);

    let (operator, value) = match column.column_type {
        ColumnType::String => {
            let has_case = search.to_lowercase() != search.to_uppercase();
            if has_case && supports(Operator::IContains) {
                (Operator::IContains, Value::from(search))
            } else if supports(Operator::Contains) {
                (Operator::Contains, Value::from(search))
            } else if supports(Operator::Equal) {
                (Operator::Equal, Value::from(search))
            } else {
                return None;
            }
        }
        ColumnType::Number if supports(Operator::Equal) => {
            let number = search.parse::<f64>().ok().filter(|n| n.is_finite())?;
            (Operator::Equal, number_value(number))
        }
        ColumnType::Enum if supports(Operator::Equal) => {
            let value = column
                .enum_values
                .iter()
                .find(|value| value.to_lowercase() == search.to_lowercase())?;
            (Operator::Equal, Value::from(value.as_str()))
        }
        ColumnType::Uuid if supports(Operator::Equal) => {
            let uuid = uuid::Uuid::parse_str(search).ok()?;
            (Operator::Equal, Value::from(uuid.to_string()))
        }
        _ => return None,
    };

    Some(ConditionTreeLeaf::new(path, operator, value).into())
}

#[async_trait]
impl Collection for SearchCollection {
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
        let rewritten = self.rewrite_filter(&filter.filter)?;
        self.child
            .list(caller, &filter.clone().with_filter(rewritten), projection)
            .await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        let rewritten = self.rewrite_filter(filter)?;
        self.child.update(caller, &rewritten, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        let rewritten = self.rewrite_filter(filter)?;
        self.child.delete(caller, &rewritten).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let rewritten = self.rewrite_filter(filter)?;
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
        let rewritten = self.rewrite_filter(filter)?;
        self.child.execute(caller, name, form_values, &rewritten).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        form_values: Option<&RecordData>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        let rewritten = filter.map(|filter| self.rewrite_filter(filter)).transpose()?;
        self.child
            .get_form(caller, name, form_values, rewritten.as_ref())
            .await
    }
}

/// Build a layer making every collection of `child` searchable.
/// `handlers` replace the default condition of the collections they name.
pub(crate) fn layer(
    child: &Arc<Datasource>,
    mut handlers: HashMap<String, SearchHandler>,
    extended_depth: usize,
) -> Result<Arc<Datasource>> {
    for name in handlers.keys() {
        child.collection(name)?;
    }

    wrap(child, |collection| {
        let handler = handlers.remove(collection.name());
        Ok(Some(Arc::new(SearchCollection::new(
            collection.clone(),
            child.clone(),
            handler,
            extended_depth,
        )) as CollectionRef))
    })
}
