//! # temps-query-customizer
//!
//! Decorators upgrading the native capabilities of `temps-query` collections
//! into one uniform surface, and the builder stacking them.
//!
//! Each decorator implements `Collection` over a child collection and either
//! delegates an operation the child supports or emulates it in memory:
//!
//! - **operators**: every operator a column type allows, through equivalence
//!   rewrites or in-memory evaluation
//! - **sort** and **search**: sorting on any column, full-text search
//! - **computed** and **relation**: computed fields and stitched relations
//! - **segment**, **action**, **write**, **validation**: named filters,
//!   custom actions, write handlers and field validation rules
//! - **publication** and **rename**: hiding and renaming collections and
//!   fields
//!
//! ## Example
//!
//! ```rust,ignore
//! use temps_query_customizer::{CustomizerOptions, DatasourceCustomizer};
//!
//! let mut customizer = DatasourceCustomizer::new(datasource)
//!     .with_options(CustomizerOptions::default());
//! customizer
//!     .customize_collection("books")
//!     .add_many_to_one_relation("author", "authors", "authorId", "id")
//!     .add_segment("published", published_tree);
//!
//! let datasource = customizer.build()?;
//! ```

pub mod config;
pub mod customizer;
pub mod decorators;
mod layer;

pub use config::CustomizerOptions;
pub use customizer::{CollectionCustomizer, DatasourceCustomizer};
pub use decorators::{
    ActionContext, ActionDefinition, ComputedContext, ComputedDefinition, SearchHandler,
    SegmentContext, SegmentDefinition, WriteHandler,
};
