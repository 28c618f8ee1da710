//! Custom write handlers.
//!
//! A handler turns the value written to one field into a patch over other
//! fields. Patches are expanded recursively, so a handler may write fields
//! that have their own handler.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use temps_query::record::values_equal;
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection, CollectionRef,
    CollectionSchema, DataError, Datasource, FieldSchema, Filter, PaginatedFilter, Projection,
    RecordData, Result,
};
use tracing::debug;

use crate::layer::wrap;

/// Receives the written value and the whole record or patch it belongs to
pub type WriteHandler = Arc<dyn Fn(&Value, &RecordData) -> Result<RecordData> + Send + Sync>;

pub struct WriteCollection {
    child: CollectionRef,
    handlers: BTreeMap<String, WriteHandler>,
    schema: CollectionSchema,
}

impl WriteCollection {
    pub fn new(child: CollectionRef, handlers: BTreeMap<String, WriteHandler>) -> Self {
        let mut schema = child.schema().clone();
        for name in handlers.keys() {
            if let Some(FieldSchema::Column(column)) = schema.fields.get_mut(name) {
                column.is_read_only = false;
            }
        }

        Self {
            child,
            handlers,
            schema,
        }
    }

    fn rewrite(&self, record: &RecordData) -> Result<RecordData> {
        if self.handlers.is_empty() {
            return Ok(record.clone());
        }
        let mut visiting = Vec::new();
        self.rewrite_with(record, record, &mut visiting)
    }

    fn rewrite_with(
        &self,
        patch: &RecordData,
        original: &RecordData,
        visiting: &mut Vec<String>,
    ) -> Result<RecordData> {
        let mut rewritten = RecordData::new();

        for (field, value) in patch {
            let Some(handler) = self.handlers.get(field) else {
                self.merge(&mut rewritten, field, value.clone())?;
                continue;
            };

            if visiting.contains(field) {
                return Err(DataError::validation(format!(
                    "Cycle while writing '{}' on '{}': {}",
                    field,
                    self.name(),
                    visiting.join(" -> ")
                )));
            }

            debug!("Rewriting write to '{}' on '{}'", field, self.name());
            visiting.push(field.clone());
            let produced = handler(value, original)?;
            let expanded = self.rewrite_with(&produced, original, visiting)?;
            visiting.pop();

            for (key, value) in expanded {
                self.merge(&mut rewritten, &key, value)?;
            }
        }

        Ok(rewritten)
    }

    fn merge(&self, record: &mut RecordData, field: &str, value: Value) -> Result<()> {
        match record.get(field) {
            Some(existing) if !values_equal(existing, &value) => Err(DataError::validation(format!(
                "Conflicting values written to '{}' on '{}'",
                field,
                self.name()
            ))),
            Some(_) => Ok(()),
            None => {
                record.insert(field.to_string(), value);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Collection for WriteCollection {
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
        self.child.list(caller, filter, projection).await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        let data = data
            .iter()
            .map(|record| self.rewrite(record))
            .collect::<Result<Vec<_>>>()?;
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        let patch = self.rewrite(patch)?;
        self.child.update(caller, filter, &patch).await
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

/// Build a layer with write `handlers` (collection -> field -> handler)
pub(crate) fn layer(
    child: &Arc<Datasource>,
    mut handlers: HashMap<String, BTreeMap<String, WriteHandler>>,
) -> Result<Arc<Datasource>> {
    for (collection, fields) in &handlers {
        let schema = child.collection(collection)?.schema();
        for field in fields.keys() {
            schema.column(field)?;
        }
    }

    wrap(child, |collection| {
        let fields = handlers.remove(collection.name()).unwrap_or_default();
        Ok(Some(
            Arc::new(WriteCollection::new(collection.clone(), fields)) as CollectionRef
        ))
    })
}
