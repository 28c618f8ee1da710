//! Sorting on columns the child cannot sort.
//!
//! Clauses may be replaced by an equivalent sort on other fields. When the
//! child still cannot sort every clause, records are listed unsorted and
//! sorted, paginated and projected in memory.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use temps_query::utils::resolve_column;
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection, CollectionRef,
    CollectionSchema, DataError, Datasource, FieldSchema, Filter, PaginatedFilter, Projection,
    RecordData, Result, Sort,
};
use tracing::debug;

use crate::layer::wrap;

pub struct SortCollection {
    child: CollectionRef,
    child_datasource: Arc<Datasource>,
    replacements: BTreeMap<String, Sort>,
    schema: CollectionSchema,
}

impl SortCollection {
    pub fn new(
        child: CollectionRef,
        child_datasource: Arc<Datasource>,
        replacements: BTreeMap<String, Sort>,
    ) -> Self {
        let mut schema = child.schema().clone();
        for field in schema.fields.values_mut() {
            if let FieldSchema::Column(column) = field {
                column.is_sortable = true;
            }
        }

        Self {
            child,
            child_datasource,
            replacements,
            schema,
        }
    }

    fn replace_sort(&self, sort: &Sort) -> Sort {
        if self.replacements.is_empty() {
            return sort.clone();
        }
        sort.replace_clauses(|clause| match self.replacements.get(&clause.field) {
            Some(replacement) if clause.ascending => replacement.clauses().to_vec(),
            Some(replacement) => replacement.inverse().clauses().to_vec(),
            None => vec![clause.clone()],
        })
    }

    fn natively_sortable(&self, sort: &Sort) -> bool {
        sort.clauses().iter().all(|clause| {
            resolve_column(
                Some(self.child_datasource.as_ref()),
                self.child.schema(),
                &clause.field,
            )
            .map(|resolved| resolved.column.is_sortable)
            .unwrap_or(false)
        })
    }
}

#[async_trait]
impl Collection for SortCollection {
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
        let sort = self.replace_sort(&filter.sort);
        if self.natively_sortable(&sort) {
            return self
                .child
                .list(caller, &filter.clone().with_sort(sort), projection)
                .await;
        }

        debug!("Sorting '{}' in memory", self.name());
        let unsorted = PaginatedFilter::new(filter.filter.clone());
        let records = self
            .child
            .list(caller, &unsorted, &projection.union(&sort.projection()))
            .await?;

        let records = sort.apply(records);
        let records = match &filter.page {
            Some(page) => page.apply(records),
            None => records,
        };
        Ok(projection.apply(records))
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        self.child.update(caller, filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        self.child.delete(caller, filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
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

/// Build a layer sorting every column, with `replacements`
/// (collection -> field -> equivalent sort)
pub(crate) fn layer(
    child: &Arc<Datasource>,
    mut replacements: HashMap<String, BTreeMap<String, Sort>>,
) -> Result<Arc<Datasource>> {
    for (collection, fields) in &replacements {
        let schema = child.collection(collection)?.schema();
        for (field, sort) in fields {
            schema.column(field)?;
            if sort.clauses().iter().any(|clause| &clause.field == field) {
                return Err(DataError::validation(format!(
                    "Sort replacement of '{}' on '{}' cannot sort on the field itself",
                    field, collection
                )));
            }
            for clause in sort.clauses() {
                resolve_column(Some(child.as_ref()), schema, &clause.field)?;
            }
        }
    }

    wrap(child, |collection| {
        let fields = replacements.remove(collection.name()).unwrap_or_default();
        Ok(Some(Arc::new(SortCollection::new(
            collection.clone(),
            child.clone(),
            fields,
        )) as CollectionRef))
    })
}
