//! In-memory implementation of the temps-query `Collection` trait
//!
//! A [`MemoryCollection`] declares its native capabilities through its
//! schema and enforces them: filters using operators a column does not
//! declare, sorts on non-sortable columns, or searches on a non-searchable
//! collection are rejected with a validation error. This makes it a faithful
//! stand-in for restricted backends when testing decorator stacks.
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use temps_query::{
//!     Caller, CollectionSchema, ColumnSchema, ColumnType, ConditionTreeLeaf, Filter, Operator,
//!     PaginatedFilter, Projection,
//! };
//! use temps_query::Collection;
//! use temps_query_memory::MemoryCollection;
//!
//! # async fn example() -> temps_query::Result<()> {
//! let users = MemoryCollection::new(
//!     "users",
//!     CollectionSchema::new()
//!         .with_field("id", ColumnSchema::new(ColumnType::Number).primary_key())
//!         .with_field(
//!             "age",
//!             ColumnSchema::new(ColumnType::Number).with_operators([Operator::GreaterThan]),
//!         ),
//! )
//! .with_records(vec![json!({"id": 1, "age": 17}), json!({"id": 2, "age": 19})]);
//!
//! let filter = PaginatedFilter::new(Filter::new().with_condition_tree(Some(
//!     ConditionTreeLeaf::new("age", Operator::GreaterThan, json!(18)).into(),
//! )));
//! let adults = users.list(&Caller::system(), &filter, &Projection::new(["id"])).await?;
//! assert_eq!(adults.len(), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use temps_query::query::condition_tree::factory::record_id;
use temps_query::query::EvalContext;
use temps_query::record::{get_value, value_key};
use temps_query::validation::{
    validate_aggregation, validate_condition_tree, validate_patch, validate_projection,
    validate_records, validate_sort,
};
use temps_query::{
    AggregateResult, Aggregation, Caller, Collection, CollectionSchema, ColumnType,
    ConditionTree, ConstraintViolation, DataError, Filter, PaginatedFilter, Projection, RecordData,
    Result,
};
use tokio::sync::RwLock;
use tracing::debug;

/// A request received by a [`MemoryCollection`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List {
        filter: PaginatedFilter,
        projection: Projection,
    },
    Create {
        records: Vec<RecordData>,
    },
    Update {
        filter: Filter,
        patch: RecordData,
    },
    Delete {
        filter: Filter,
    },
    Aggregate {
        filter: Filter,
        aggregation: Aggregation,
        limit: Option<usize>,
    },
}

/// Records selected by a filter, with search and segment already resolved
struct Selection {
    tree: Option<ConditionTree>,
    search: Option<String>,
    ctx: EvalContext,
}

impl Selection {
    fn matches(&self, schema: &CollectionSchema, record: &RecordData) -> Result<bool> {
        if let Some(search) = &self.search {
            let found = schema
                .columns()
                .filter(|(_, column)| column.column_type == ColumnType::String)
                .any(|(name, _)| match record.get(name) {
                    Some(Value::String(text)) => text.to_lowercase().contains(search),
                    _ => false,
                });
            if !found {
                return Ok(false);
            }
        }

        match &self.tree {
            Some(tree) => tree.matches(record, &self.ctx),
            None => Ok(true),
        }
    }
}

/// Collection keeping its records in memory
pub struct MemoryCollection {
    name: String,
    schema: CollectionSchema,
    records: RwLock<Vec<RecordData>>,
    segments: HashMap<String, ConditionTree>,
    unique: Vec<Vec<String>>,
    required: Vec<String>,
    read_only: bool,
    calls: Mutex<Vec<Call>>,
}

impl MemoryCollection {
    /// Create an empty collection with the given native capabilities
    pub fn new(name: impl Into<String>, schema: CollectionSchema) -> Self {
        Self {
            name: name.into(),
            schema,
            records: RwLock::new(Vec::new()),
            segments: HashMap::new(),
            unique: Vec::new(),
            required: Vec::new(),
            read_only: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Seed the collection. Non-object values are ignored.
    pub fn with_records(mut self, records: Vec<Value>) -> Self {
        self.records.get_mut().extend(
            records
                .into_iter()
                .filter_map(|value| value.as_object().cloned()),
        );
        self
    }

    /// Declare a native segment
    pub fn with_segment(mut self, name: impl Into<String>, tree: ConditionTree) -> Self {
        let name = name.into();
        self.schema = self.schema.with_segment(name.clone());
        self.segments.insert(name, tree);
        self
    }

    /// Reject writes that would create two records with the same values for `fields`
    pub fn with_unique(mut self, fields: &[&str]) -> Self {
        self.unique
            .push(fields.iter().map(|field| field.to_string()).collect());
        self
    }

    /// Reject records leaving `field` null
    pub fn with_required(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Reject every write with [`DataError::Forbidden`]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Requests received so far, oldest first
    pub fn calls(&self) -> Vec<Call> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of `list` requests received so far
    pub fn list_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::List { .. }))
            .count()
    }

    pub fn reset_calls(&self) {
        match self.calls.lock() {
            Ok(mut calls) => calls.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Snapshot of the stored records
    pub async fn records(&self) -> Vec<RecordData> {
        self.records.read().await.clone()
    }

    fn record_call(&self, call: Call) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(DataError::forbidden(format!(
                "Collection '{}' is read-only",
                self.name
            )));
        }
        Ok(())
    }

    /// Check the filter against the declared capabilities and resolve its
    /// search and segment
    fn select(&self, filter: &Filter) -> Result<Selection> {
        let search = match filter.search.as_deref().map(str::trim) {
            Some(search) if !search.is_empty() => {
                if !self.schema.searchable {
                    return Err(DataError::validation(format!(
                        "Collection '{}' does not support search",
                        self.name
                    )));
                }
                Some(search.to_lowercase())
            }
            _ => None,
        };

        let segment = match &filter.segment {
            Some(name) => Some(self.segments.get(name).cloned().ok_or_else(|| {
                DataError::not_found(format!("Segment '{}' not found on '{}'", name, self.name))
            })?),
            None => None,
        };

        if let Some(tree) = &filter.condition_tree {
            validate_condition_tree(None, &self.schema, tree)?;
        }

        Ok(Selection {
            tree: temps_query::factory::intersect(vec![filter.condition_tree.clone(), segment]),
            search,
            ctx: filter.eval_context()?,
        })
    }

    fn matching(&self, records: &[RecordData], filter: &Filter) -> Result<Vec<RecordData>> {
        let selection = self.select(filter)?;
        let mut matched = Vec::new();
        for record in records {
            if selection.matches(&self.schema, record)? {
                matched.push(record.clone());
            }
        }
        Ok(matched)
    }

    /// Fill defaults and generate missing primary keys
    fn prepare(&self, existing: &[RecordData], mut record: RecordData) -> RecordData {
        for (name, column) in self.schema.columns() {
            let missing = record.get(name).map_or(true, Value::is_null);
            if !missing {
                continue;
            }

            if let Some(default) = &column.default_value {
                record.insert(name.to_string(), default.clone());
            } else if column.is_primary_key && self.schema.primary_keys().len() == 1 {
                let generated = match column.column_type {
                    ColumnType::Number => {
                        let max = existing
                            .iter()
                            .filter_map(|r| r.get(name).and_then(Value::as_i64))
                            .max()
                            .unwrap_or(0);
                        Value::from(max + 1)
                    }
                    ColumnType::Uuid | ColumnType::String => {
                        Value::from(uuid::Uuid::new_v4().to_string())
                    }
                    _ => continue,
                };
                record.insert(name.to_string(), generated);
            }
        }
        record
    }

    fn check_constraints(&self, records: &[RecordData]) -> Result<()> {
        for field in &self.required {
            if records.iter().any(|r| get_value(r, field).is_null()) {
                return Err(DataError::Constraint(ConstraintViolation::NotNull {
                    collection: self.name.clone(),
                    field: field.clone(),
                }));
            }
        }

        let primary_keys: Vec<String> = self
            .schema
            .primary_keys()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut constraints = self.unique.clone();
        if !primary_keys.is_empty() {
            constraints.push(primary_keys);
        }

        for fields in &constraints {
            let mut seen = HashSet::new();
            for record in records {
                let key: Vec<String> = fields
                    .iter()
                    .map(|field| value_key(&get_value(record, field)))
                    .collect();
                if !seen.insert(key) {
                    return Err(DataError::Constraint(ConstraintViolation::Unique {
                        collection: self.name.clone(),
                        fields: fields.clone(),
                    }));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Collection for MemoryCollection {
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
        self.record_call(Call::List {
            filter: filter.clone(),
            projection: projection.clone(),
        });

        validate_projection(None, &self.schema, projection)?;
        validate_sort(None, &self.schema, &filter.sort)?;

        let records = self.records.read().await;
        let matched = self.matching(&records, &filter.filter)?;
        let sorted = filter.sort.apply(matched);
        let paged = match &filter.page {
            Some(page) => page.apply(sorted),
            None => sorted,
        };

        debug!("Listed {} records from '{}'", paged.len(), self.name);
        Ok(projection.apply(paged))
    }

    async fn create(&self, _caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.record_call(Call::Create {
            records: data.clone(),
        });
        self.check_writable()?;
        validate_records(&self.schema, &data)?;

        let mut records = self.records.write().await;
        let mut created = Vec::with_capacity(data.len());
        for record in data {
            let all: Vec<RecordData> = records.iter().chain(created.iter()).cloned().collect();
            created.push(self.prepare(&all, record));
        }

        let mut next: Vec<RecordData> = records.clone();
        next.extend(created.iter().cloned());
        self.check_constraints(&next)?;

        let ids = created
            .iter()
            .map(|r| Value::Array(record_id(&self.schema, r)).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        debug!("Created {} records in '{}' ({})", created.len(), self.name, ids);
        *records = next;
        Ok(created)
    }

    async fn update(&self, _caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        self.record_call(Call::Update {
            filter: filter.clone(),
            patch: patch.clone(),
        });
        self.check_writable()?;
        validate_patch(&self.schema, patch)?;

        let selection = self.select(filter)?;
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let mut updated = 0;
        for record in next.iter_mut() {
            if selection.matches(&self.schema, record)? {
                for (field, value) in patch {
                    record.insert(field.clone(), value.clone());
                }
                updated += 1;
            }
        }

        self.check_constraints(&next)?;
        debug!("Updated {} records in '{}'", updated, self.name);
        *records = next;
        Ok(())
    }

    async fn delete(&self, _caller: &Caller, filter: &Filter) -> Result<()> {
        self.record_call(Call::Delete {
            filter: filter.clone(),
        });
        self.check_writable()?;

        let selection = self.select(filter)?;
        let mut records = self.records.write().await;
        let mut kept = Vec::with_capacity(records.len());
        for record in records.iter() {
            if !selection.matches(&self.schema, record)? {
                kept.push(record.clone());
            }
        }

        debug!(
            "Deleted {} records from '{}'",
            records.len() - kept.len(),
            self.name
        );
        *records = kept;
        Ok(())
    }

    async fn aggregate(
        &self,
        _caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        self.record_call(Call::Aggregate {
            filter: filter.clone(),
            aggregation: aggregation.clone(),
            limit,
        });
        validate_aggregation(None, &self.schema, aggregation)?;

        let records = self.records.read().await;
        let matched = self.matching(&records, filter)?;
        Ok(aggregation.apply(&matched, filter.eval_context()?.timezone, limit))
    }
}
