//! Operator emulation.
//!
//! Every column is exposed with the full set of operators its type allows.
//! Leaves using an operator the child does not support are rewritten with
//! the equivalence rules of `temps-query`. When no rewrite exists, the leaf
//! is evaluated in memory over the child's records and replaced by a match
//! on the primary keys of the records it selects.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use temps_query::query::condition_tree::equivalence::{emulable_operators, resolve};
use temps_query::utils::resolve_column;
use temps_query::validation::validate_leaf_value;
use temps_query::{
    allowed_operators, ActionField, ActionResult, AggregateResult, Aggregation, Caller,
    Collection, CollectionRef, CollectionSchema, ColumnSchema, ConditionTree, ConditionTreeLeaf,
    DataError, Datasource, EvalContext, FieldSchema, Filter, Operator, PaginatedFilter,
    Projection, RecordData, Result,
};
use tracing::debug;

use crate::layer::{key_match, wrap};

/// Operators a column can be filtered with once emulation is in place
fn exposed_operators(column: &ColumnSchema, has_primary_key: bool) -> BTreeSet<Operator> {
    let mut operators = if has_primary_key {
        allowed_operators(&column.column_type)
    } else {
        emulable_operators(&column.filter_operators, &column.column_type)
    };
    operators.extend(column.filter_operators.iter().copied());
    operators
}

pub struct OperatorsCollection {
    child: CollectionRef,
    child_datasource: Arc<Datasource>,
    schema: CollectionSchema,
}

impl OperatorsCollection {
    pub fn new(child: CollectionRef, child_datasource: Arc<Datasource>) -> Self {
        let child_schema = child.schema();
        let has_primary_key = !child_schema.primary_keys().is_empty();

        let mut schema = child_schema.clone();
        for field in schema.fields.values_mut() {
            if let FieldSchema::Column(column) = field {
                column.filter_operators = exposed_operators(column, has_primary_key);
            }
        }

        Self {
            child,
            child_datasource,
            schema,
        }
    }

    async fn rewrite_filter(&self, caller: &Caller, filter: &Filter) -> Result<Filter> {
        let Some(tree) = &filter.condition_tree else {
            return Ok(filter.clone());
        };

        let ctx = filter.eval_context()?;
        let replacements = try_join_all(
            tree.leaves()
                .into_iter()
                .map(|leaf| self.rewrite_leaf(caller, leaf, &filter.timezone, &ctx)),
        )
        .await?;

        Ok(filter
            .clone()
            .with_condition_tree(Some(tree.replace_leafs_in_order(replacements)?)))
    }

    async fn rewrite_leaf(
        &self,
        caller: &Caller,
        leaf: &ConditionTreeLeaf,
        timezone: &str,
        ctx: &EvalContext,
    ) -> Result<ConditionTree> {
        let resolved = resolve_column(
            Some(self.child_datasource.as_ref()),
            self.child.schema(),
            &leaf.field,
        )?;
        let column = resolved.column;
        validate_leaf_value(&leaf.field, column, leaf.operator, leaf.value.as_ref())?;

        if column.filter_operators.contains(&leaf.operator) {
            return Ok(leaf.clone().into());
        }

        let has_primary_key = !self.child.schema().primary_keys().is_empty();
        if !exposed_operators(column, has_primary_key).contains(&leaf.operator) {
            return Err(DataError::validation(format!(
                "Operator '{}' is not supported on '{}' ({})",
                leaf.operator, leaf.field, column.column_type
            )));
        }

        match resolve(leaf.operator, &column.filter_operators, &column.column_type) {
            Some(replacer) => {
                debug!(
                    "Rewriting '{} {}' on '{}' with supported operators",
                    leaf.field,
                    leaf.operator,
                    self.name()
                );
                replacer.apply(leaf, &column.column_type, ctx)
            }
            None => self.evaluate_in_memory(caller, leaf, timezone, ctx).await,
        }
    }

    /// Evaluate the leaf over every record of the child and select the
    /// matches by primary key
    async fn evaluate_in_memory(
        &self,
        caller: &Caller,
        leaf: &ConditionTreeLeaf,
        timezone: &str,
        ctx: &EvalContext,
    ) -> Result<ConditionTree> {
        debug!(
            "Evaluating '{} {}' in memory on '{}'",
            leaf.field,
            leaf.operator,
            self.name()
        );

        let schema = self.child.schema();
        let projection = Projection::new([leaf.field.as_str()]).with_pks(schema);
        let filter = PaginatedFilter::new(Filter::new().with_timezone(timezone));
        let records = self.child.list(caller, &filter, &projection).await?;

        let mut matching = Vec::new();
        for record in records {
            if leaf.matches(&record, ctx)? {
                matching.push(record);
            }
        }

        key_match(schema, self.name(), &matching, ctx)
    }
}

#[async_trait]
impl Collection for OperatorsCollection {
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
        let rewritten = self.rewrite_filter(caller, &filter.filter).await?;
        self.child
            .list(caller, &filter.clone().with_filter(rewritten), projection)
            .await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child.update(caller, &rewritten, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child.delete(caller, &rewritten).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child
            .aggregate(caller, &rewritten, aggregation, limit)
            .await
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        let rewritten = self.rewrite_filter(caller, filter).await?;
        self.child.execute(caller, name, form_values, &rewritten).await
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

/// Build a layer exposing every operator each column type allows
pub(crate) fn layer(child: &Arc<Datasource>) -> Result<Arc<Datasource>> {
    wrap(child, |collection| {
        Ok(Some(Arc::new(OperatorsCollection::new(
            collection.clone(),
            child.clone(),
        )) as CollectionRef))
    })
}
