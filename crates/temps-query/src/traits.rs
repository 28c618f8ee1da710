use crate::error::{DataError, Result};
use crate::query::aggregation::{AggregateResult, Aggregation};
use crate::query::filter::{Filter, PaginatedFilter};
use crate::query::projection::Projection;
use crate::schema::CollectionSchema;
use crate::types::{ActionField, ActionResult, Caller, RecordData};
use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use std::sync::Arc;

/// Uniform contract implemented by backends and by every decorator layer.
///
/// The schema declares what the collection can do natively: callers must
/// only use filter operators, sorts, segments and search the schema exposes.
/// Implementations fail with [`DataError::Validation`] on malformed input and
/// never silently drop conditions.
#[async_trait]
pub trait Collection: Send + Sync + DowncastSync {
    /// Name of the collection inside its datasource
    fn name(&self) -> &str;

    /// Declared capabilities
    fn schema(&self) -> &CollectionSchema;

    /// List records matching the filter, sorted and paginated, reduced to the projection.
    /// Relation fields in the projection come back as nested objects (or arrays for to-many).
    async fn list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>>;

    /// Insert records, returning them with generated values (keys, defaults)
    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>>;

    /// Apply `patch` to every record matching the filter
    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()>;

    /// Delete every record matching the filter
    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()>;

    /// Aggregate matching records. Results are sorted by value, descending.
    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>>;

    /// Run a named action on the records selected by the filter
    async fn execute(
        &self,
        _caller: &Caller,
        name: &str,
        _form_values: &RecordData,
        _filter: &Filter,
    ) -> Result<ActionResult> {
        Err(DataError::not_found(format!(
            "Action '{}' not found on '{}'",
            name,
            self.name()
        )))
    }

    /// Form of a named action, with defaults and current values filled
    async fn get_form(
        &self,
        _caller: &Caller,
        name: &str,
        _form_values: Option<&RecordData>,
        _filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        Err(DataError::not_found(format!(
            "Action '{}' not found on '{}'",
            name,
            self.name()
        )))
    }
}

impl_downcast!(sync Collection);

impl std::fmt::Debug for dyn Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name()).finish()
    }
}

/// Shared handle to a collection
pub type CollectionRef = Arc<dyn Collection>;
