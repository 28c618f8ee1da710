//! # temps-query
//!
//! Uniform query and mutation contract over heterogeneous collections.
//!
//! Backends differ in what they can do natively: some evaluate arbitrary
//! boolean filters, others only equality; some sort or search server-side,
//! others cannot. This crate provides the vocabulary shared by backends and
//! by the decorators that emulate missing capabilities:
//!
//! - **ConditionTree**: boolean filter expressions and their rewrite rules
//! - **Filter / PaginatedFilter**: condition tree, search, segment, sort and page
//! - **Projection**, **Sort**, **Aggregation**: what to read, in which order, how to reduce it
//! - **CollectionSchema**: the capabilities a collection declares
//! - **Collection**: the async contract every backend and decorator implements
//! - **Datasource**: named collections with validated relations
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use temps_query::{ConditionTree, ConditionTreeLeaf, EvalContext, Operator};
//!
//! let adults: ConditionTree =
//!     ConditionTreeLeaf::new("age", Operator::GreaterThan, json!(18)).into();
//! let records = vec![
//!     json!({"age": 17}).as_object().cloned().unwrap(),
//!     json!({"age": 19}).as_object().cloned().unwrap(),
//! ];
//!
//! let matching = adults.apply(records, &EvalContext::default()).unwrap();
//! assert_eq!(matching.len(), 1);
//! ```
//!
//! ## Backend Implementation
//!
//! To implement a new backend:
//!
//! 1. Create a struct that implements `Collection`
//! 2. Declare in its `CollectionSchema` the operators and sorts it evaluates natively
//! 3. Register its collections in a `Datasource`
//! 4. Wrap the datasource with `temps-query-customizer` to expose the full capability set
//!
//! See `temps-query-memory` for a reference backend.

pub mod error;
pub mod query;
pub mod record;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod types;
pub mod utils;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used items
pub use error::{ConstraintViolation, DataError, Result};
pub use query::{
    allowed_operators, factory, AggregateResult, Aggregation, AggregationGroup,
    AggregationOperation, Aggregator, ConditionTree, ConditionTreeBranch, ConditionTreeLeaf,
    DateOperation, EvalContext, Filter, Operator, Page, PaginatedFilter, Projection, Sort,
    SortClause,
};
pub use registry::Datasource;
pub use schema::{ActionSchema, CollectionSchema, ColumnSchema, FieldSchema, RelationSchema};
pub use traits::{Collection, CollectionRef};
pub use types::{
    ActionField, ActionFieldType, ActionResult, ActionScope, Caller, ColumnType, CompositeId,
    RecordData,
};
