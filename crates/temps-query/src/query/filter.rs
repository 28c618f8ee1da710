use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};
use crate::query::condition_tree::ConditionTree;
use crate::query::context::{parse_timezone, EvalContext, DEFAULT_TIMEZONE};
use crate::query::sort::Sort;
use crate::types::RecordData;

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Record selection: condition tree, free-text search and named segment.
///
/// Search and segment are resolved by the layers declaring them; a filter
/// reaching a backend only carries a condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_tree: Option<ConditionTree>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default)]
    pub search_extended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            condition_tree: None,
            search: None,
            search_extended: false,
            segment: None,
            timezone: default_timezone(),
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition_tree(mut self, condition_tree: Option<ConditionTree>) -> Self {
        self.condition_tree = condition_tree;
        self
    }

    pub fn with_search(mut self, search: Option<String>) -> Self {
        self.search = search;
        self
    }

    pub fn with_search_extended(mut self, search_extended: bool) -> Self {
        self.search_extended = search_extended;
        self
    }

    pub fn with_segment(mut self, segment: Option<String>) -> Self {
        self.segment = segment;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Whether the filter can be moved to another collection
    pub fn is_nestable(&self) -> bool {
        self.search.is_none() && self.segment.is_none()
    }

    pub fn nest(&self, prefix: &str) -> Result<Filter> {
        if !self.is_nestable() {
            return Err(DataError::validation("Filter with search or segment cannot be nested"));
        }

        Ok(self
            .clone()
            .with_condition_tree(self.condition_tree.as_ref().map(|tree| tree.nest(prefix))))
    }

    pub fn unnest(&self) -> Result<Filter> {
        if !self.is_nestable() {
            return Err(DataError::validation("Filter with search or segment cannot be unnested"));
        }

        let condition_tree = self
            .condition_tree
            .as_ref()
            .map(ConditionTree::unnest)
            .transpose()?;
        Ok(self.clone().with_condition_tree(condition_tree))
    }

    /// Clock and timezone to evaluate relative dates with
    pub fn eval_context(&self) -> Result<EvalContext> {
        Ok(EvalContext::new(parse_timezone(&self.timezone)?))
    }

    /// Evaluate the filter in memory. Search and segment must already be
    /// translated into the condition tree.
    pub fn apply(&self, records: Vec<RecordData>) -> Result<Vec<RecordData>> {
        if self.search.is_some() {
            return Err(DataError::operation_not_supported("search"));
        }
        if let Some(segment) = &self.segment {
            return Err(DataError::operation_not_supported(format!("segment '{}'", segment)));
        }

        match &self.condition_tree {
            Some(tree) => tree.apply(records, &self.eval_context()?),
            None => Ok(records),
        }
    }
}

/// Window into a sorted result set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }

    pub fn apply(&self, records: Vec<RecordData>) -> Vec<RecordData> {
        let remaining = records.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => remaining.take(limit).collect(),
            None => remaining.collect(),
        }
    }
}

/// Filter with ordering and pagination, used by list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginatedFilter {
    #[serde(flatten)]
    pub filter: Filter,
    #[serde(default)]
    pub sort: Sort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
}

impl PaginatedFilter {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Sort::default(),
            page: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, page: Option<Page>) -> Self {
        self.page = page;
        self
    }

    pub fn with_condition_tree(mut self, condition_tree: Option<ConditionTree>) -> Self {
        self.filter.condition_tree = condition_tree;
        self
    }

    pub fn nest(&self, prefix: &str) -> Result<PaginatedFilter> {
        Ok(PaginatedFilter {
            filter: self.filter.nest(prefix)?,
            sort: self.sort.nest(prefix),
            page: self.page,
        })
    }

    pub fn unnest(&self) -> Result<PaginatedFilter> {
        Ok(PaginatedFilter {
            filter: self.filter.unnest()?,
            sort: self.sort.unnest()?,
            page: self.page,
        })
    }

    /// Filter, then sort, then paginate
    pub fn apply(&self, records: Vec<RecordData>) -> Result<Vec<RecordData>> {
        let records = self.sort.apply(self.filter.apply(records)?);
        Ok(match &self.page {
            Some(page) => page.apply(records),
            None => records,
        })
    }
}

impl From<Filter> for PaginatedFilter {
    fn from(filter: Filter) -> Self {
        PaginatedFilter::new(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::condition_tree::ConditionTreeLeaf;
    use crate::query::operator::Operator;
    use crate::query::sort::SortClause;
    use serde_json::{json, Value};

    fn records(values: Value) -> Vec<RecordData> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_default_timezone() {
        let filter: Filter = serde_json::from_value(json!({})).unwrap();
        assert_eq!(filter.timezone, "UTC");
        assert_eq!(Filter::new().timezone, "UTC");
    }

    #[test]
    fn test_nest_rejects_search_and_segment() {
        let filter = Filter::new().with_search(Some("dune".into()));
        assert!(filter.nest("book").unwrap_err().is_validation());

        let filter = Filter::new().with_segment(Some("active".into()));
        assert!(filter.unnest().is_err());
    }

    #[test]
    fn test_invalid_timezone() {
        let filter = Filter::new().with_timezone("Nowhere/City");
        assert!(filter.eval_context().unwrap_err().is_validation());
    }

    #[test]
    fn test_paginated_apply() {
        let filter = PaginatedFilter::new(Filter::new().with_condition_tree(Some(
            ConditionTreeLeaf::new("age", Operator::GreaterThan, json!(10)).into(),
        )))
        .with_sort(Sort::new(vec![SortClause::descending("age")]))
        .with_page(Some(Page::new(1, 2)));

        let result = filter
            .apply(records(json!([
                {"age": 5}, {"age": 20}, {"age": 11}, {"age": 30}, {"age": 15}
            ])))
            .unwrap();

        assert_eq!(result, records(json!([{"age": 20}, {"age": 15}])));
    }

    #[test]
    fn test_apply_with_unresolved_search() {
        let filter = Filter::new().with_search(Some("x".into()));
        assert!(matches!(
            filter.apply(Vec::new()),
            Err(DataError::OperationNotSupported(_))
        ));
    }
}
