use crate::error::Result;
use crate::query::aggregation::{AggregateResult, Aggregation};
use crate::query::filter::{Filter, PaginatedFilter};
use crate::query::projection::Projection;
use crate::schema::CollectionSchema;
use crate::traits::Collection;
use crate::types::{Caller, RecordData};
use async_trait::async_trait;
use chrono_tz::Tz;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Collection over a fixed record list, recording the filters it receives
pub struct StubCollection {
    name: String,
    schema: CollectionSchema,
    records: Vec<RecordData>,
    pub lists: Mutex<Vec<PaginatedFilter>>,
}

impl StubCollection {
    pub fn new(name: &str, schema: CollectionSchema, records: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            schema,
            records: records
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
            lists: Mutex::new(Vec::new()),
        }
    }

    pub fn arc(name: &str, schema: CollectionSchema) -> Arc<dyn Collection> {
        Arc::new(Self::new(name, schema, Vec::new()))
    }
}

#[async_trait]
impl Collection for StubCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    async fn list(
        &self,
        _caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        self.lists.lock().unwrap().push(filter.clone());
        Ok(projection.apply(filter.apply(self.records.clone())?))
    }

    async fn create(&self, _caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        Ok(data)
    }

    async fn update(&self, _caller: &Caller, _filter: &Filter, _patch: &RecordData) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _caller: &Caller, _filter: &Filter) -> Result<()> {
        Ok(())
    }

    async fn aggregate(
        &self,
        _caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let records = filter.apply(self.records.clone())?;
        Ok(aggregation.apply(&records, Tz::UTC, limit))
    }
}
