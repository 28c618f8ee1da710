//! Query model: condition trees, filters, projections, sorts and aggregations.

pub mod aggregation;
pub mod condition_tree;
pub mod context;
pub mod filter;
pub mod operator;
pub mod projection;
pub mod sort;

pub use aggregation::{
    AggregateResult, Aggregation, AggregationGroup, AggregationOperation, DateOperation,
};
pub use condition_tree::{
    factory, Aggregator, ConditionTree, ConditionTreeBranch, ConditionTreeLeaf,
};
pub use context::{parse_timezone, EvalContext, DEFAULT_TIMEZONE};
pub use filter::{Filter, Page, PaginatedFilter};
pub use operator::{allowed_operators, Operator};
pub use projection::Projection;
pub use sort::{Sort, SortClause};
