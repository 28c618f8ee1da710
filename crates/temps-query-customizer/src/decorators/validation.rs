//! Field validation rules checked on writes.
//!
//! Rules are condition-tree leaves on one column. Created records and update
//! patches must satisfy every rule of the fields they write. Constraint
//! violations reported by the backend come back as validation errors.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use temps_query::validation::validate_leaf_value;
use temps_query::{
    ActionField, ActionResult, AggregateResult, Aggregation, Caller, Collection, CollectionRef,
    CollectionSchema, ConditionTreeLeaf, DataError, Datasource, EvalContext, Filter, Operator,
    PaginatedFilter, Projection, RecordData, Result,
};

use crate::layer::wrap;

pub struct ValidationCollection {
    child: CollectionRef,
    rules: BTreeMap<String, Vec<ConditionTreeLeaf>>,
}

impl ValidationCollection {
    pub fn new(child: CollectionRef, rules: BTreeMap<String, Vec<ConditionTreeLeaf>>) -> Self {
        Self { child, rules }
    }

    /// Check the written fields of a record or patch. Missing fields are
    /// only checked on creation, where a `Present` rule makes them required.
    fn check(&self, record: &RecordData, creating: bool) -> Result<()> {
        let ctx = EvalContext::default();

        for (field, rules) in &self.rules {
            if !creating && !record.contains_key(field) {
                continue;
            }
            for rule in rules {
                let required = rule.operator == Operator::Present;
                if !record.contains_key(field) && !required {
                    continue;
                }
                if !rule.matches(record, &ctx)? {
                    let expected = match &rule.value {
                        Some(value) => format!("{} {}", rule.operator, value),
                        None => rule.operator.to_string(),
                    };
                    return Err(DataError::validation(format!(
                        "Field '{}' of '{}' failed validation rule '{}'",
                        field,
                        self.name(),
                        expected
                    )));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Collection for ValidationCollection {
    fn name(&self) -> &str {
        self.child.name()
    }

    fn schema(&self) -> &CollectionSchema {
        self.child.schema()
    }

    async fn list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> Result<Vec<RecordData>> {
        self.child.list(caller, filter, projection).await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        for record in &data {
            self.check(record, true)?;
        }
        self.child
            .create(caller, data)
            .await
            .map_err(DataError::translate_constraint)
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        self.check(patch, false)?;
        self.child
            .update(caller, filter, patch)
            .await
            .map_err(DataError::translate_constraint)
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        self.child
            .delete(caller, filter)
            .await
            .map_err(DataError::translate_constraint)
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> Result<Vec<AggregateResult>> {
        self.child.aggregate(caller, filter, aggregation, limit).await
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        form_values: &RecordData,
        filter: &Filter,
    ) -> Result<ActionResult> {
        self.child
            .execute(caller, name, form_values, filter)
            .await
            .map_err(DataError::translate_constraint)
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

/// Build a layer checking `rules` (collection -> rules). Each rule must be a
/// valid leaf on a writable column.
pub(crate) fn layer(
    child: &Arc<Datasource>,
    rules: Vec<(String, ConditionTreeLeaf)>,
) -> Result<Arc<Datasource>> {
    let mut by_collection: HashMap<String, BTreeMap<String, Vec<ConditionTreeLeaf>>> =
        HashMap::new();

    for (collection, rule) in rules {
        let schema = child.collection(&collection)?.schema();
        let column = schema.column(&rule.field)?;
        if column.is_read_only {
            return Err(DataError::validation(format!(
                "Cannot validate read-only field '{}' of '{}'",
                rule.field, collection
            )));
        }
        if rule.operator.is_relative_date() {
            return Err(DataError::validation(format!(
                "Operator '{}' cannot be used as a validation rule",
                rule.operator
            )));
        }
        validate_leaf_value(&rule.field, column, rule.operator, rule.value.as_ref())?;

        by_collection
            .entry(collection)
            .or_default()
            .entry(rule.field.clone())
            .or_default()
            .push(rule);
    }

    wrap(child, |collection| {
        let rules = by_collection.remove(collection.name()).unwrap_or_default();
        Ok(Some(
            Arc::new(ValidationCollection::new(collection.clone(), rules)) as CollectionRef
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use temps_query::{ColumnSchema, ColumnType};
    use temps_query_memory::MemoryCollection;

    fn accounts() -> Arc<MemoryCollection> {
        Arc::new(
            MemoryCollection::new(
                "accounts",
                CollectionSchema::new()
                    .with_field(
                        "id",
                        ColumnSchema::new(ColumnType::Number)
                            .primary_key()
                            .with_operators([Operator::Equal]),
                    )
                    .with_field("email", ColumnSchema::new(ColumnType::String))
                    .with_field("age", ColumnSchema::new(ColumnType::Number)),
            )
            .with_unique(&["email"])
            .with_records(vec![json!({"id": 1, "email": "ada@example.com", "age": 36})]),
        )
    }

    fn build(rules: Vec<ConditionTreeLeaf>) -> Result<CollectionRef> {
        let child = Arc::new(Datasource::new(vec![accounts() as CollectionRef]).unwrap());
        let rules = rules.into_iter().map(|rule| ("accounts".to_string(), rule)).collect();
        Ok(layer(&child, rules)?.collection("accounts")?.clone())
    }

    fn record(value: Value) -> RecordData {
        value.as_object().cloned().unwrap()
    }

    fn rules() -> Vec<ConditionTreeLeaf> {
        vec![
            ConditionTreeLeaf::new("email", Operator::Present, None),
            ConditionTreeLeaf::new("email", Operator::Contains, json!("@")),
            ConditionTreeLeaf::new("age", Operator::GreaterThanOrEqual, json!(18)),
        ]
    }

    #[tokio::test]
    async fn test_create_is_checked() {
        let accounts = build(rules()).unwrap();
        let caller = Caller::system();

        let invalid = accounts
            .create(&caller, vec![record(json!({"email": "nope", "age": 40}))])
            .await;
        assert!(invalid.unwrap_err().is_validation());

        let missing = accounts
            .create(&caller, vec![record(json!({"age": 40}))])
            .await;
        assert!(missing.unwrap_err().is_validation());

        let created = accounts
            .create(&caller, vec![record(json!({"email": "bob@example.com", "age": 40}))])
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn test_update_checks_written_fields_only() {
        let accounts = build(rules()).unwrap();
        let filter = Filter::new();

        accounts
            .update(&Caller::system(), &filter, &record(json!({"age": 50})))
            .await
            .unwrap();

        let error = accounts
            .update(&Caller::system(), &filter, &record(json!({"age": 12})))
            .await
            .unwrap_err();
        assert!(error.is_validation());
    }

    #[tokio::test]
    async fn test_constraint_is_translated() {
        let accounts = build(vec![]).unwrap();
        let error = accounts
            .create(
                &Caller::system(),
                vec![record(json!({"email": "ada@example.com", "age": 20}))],
            )
            .await
            .unwrap_err();
        assert!(error.is_validation());
    }

    #[test]
    fn test_invalid_rule() {
        let result = build(vec![ConditionTreeLeaf::new("age", Operator::Contains, json!("1"))]);
        assert!(result.is_err());
    }
}
