//! Collection decorators, one capability each.
//!
//! Each module exposes its decorator and a `layer` function wrapping every
//! collection of a datasource. `DatasourceCustomizer` stacks the layers.

pub mod action;
pub mod computed;
pub mod empty;
pub mod operators;
pub mod publication;
pub mod relation;
pub mod rename;
pub mod search;
pub mod segment;
pub mod sort;
pub mod validation;
pub mod write;

pub use action::{ActionCollection, ActionContext, ActionDefinition};
pub use computed::{ComputedCollection, ComputedContext, ComputedDefinition};
pub use empty::EmptyCollection;
pub use operators::OperatorsCollection;
pub use publication::PublicationCollection;
pub use relation::RelationCollection;
pub use rename::RenameCollection;
pub use search::{SearchCollection, SearchHandler};
pub use segment::{SegmentCollection, SegmentContext, SegmentDefinition};
pub use sort::SortCollection;
pub use validation::ValidationCollection;
pub use write::{WriteCollection, WriteHandler};
