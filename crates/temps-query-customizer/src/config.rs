//! Customizer configuration types

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use temps_query::query::{parse_timezone, DEFAULT_TIMEZONE};
use temps_query::{DataError, Filter, Result};

/// Default maximum number of relation hops in a field path
pub const DEFAULT_MAX_RELATION_DEPTH: usize = 5;
/// Default number of to-one relation levels visited by extended search
pub const DEFAULT_EXTENDED_SEARCH_DEPTH: usize = 1;

// Helper functions for serde defaults
fn default_max_relation_depth() -> usize {
    DEFAULT_MAX_RELATION_DEPTH
}

fn default_extended_search_depth() -> usize {
    DEFAULT_EXTENDED_SEARCH_DEPTH
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

// Helper functions for schemars examples
fn example_timezone() -> &'static str {
    "Europe/Paris"
}

/// Options applied to every decorator built by a `DatasourceCustomizer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(
    title = "Customizer Options",
    description = "Limits and defaults used by the decorator chain"
)]
pub struct CustomizerOptions {
    /// Maximum number of relation hops (`:`) accepted in a field path
    #[serde(default = "default_max_relation_depth")]
    #[schemars(default = "default_max_relation_depth")]
    pub max_relation_depth: usize,

    /// How many levels of to-one relations an extended search visits
    #[serde(default = "default_extended_search_depth")]
    #[schemars(default = "default_extended_search_depth")]
    pub extended_search_depth: usize,

    /// IANA timezone of the filters created internally by decorators
    #[serde(default = "default_timezone")]
    #[schemars(example = "example_timezone", default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for CustomizerOptions {
    fn default() -> Self {
        Self {
            max_relation_depth: default_max_relation_depth(),
            extended_search_depth: default_extended_search_depth(),
            default_timezone: default_timezone(),
        }
    }
}

impl CustomizerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_relation_depth == 0 {
            return Err(DataError::validation(
                "max_relation_depth must be at least 1",
            ));
        }
        parse_timezone(&self.default_timezone)?;
        Ok(())
    }

    /// Empty filter carrying the default timezone
    pub fn base_filter(&self) -> Filter {
        Filter::new().with_timezone(self.default_timezone.clone())
    }
}
