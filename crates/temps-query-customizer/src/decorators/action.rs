//! Actions declared on collections.
//!
//! An action has a scope, an optional form and an async handler. Form
//! defaults are filled and required fields checked before the handler runs.
//! Actions unknown to the layer are delegated to the child.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use temps_query::{
    ActionField, ActionResult, ActionSchema, ActionScope, AggregateResult, Aggregation, Caller,
    Collection, CollectionRef, CollectionSchema, DataError, Datasource, Filter, PaginatedFilter,
    Projection, RecordData, Result,
};
use tracing::debug;

use crate::layer::wrap;

pub type ActionHandler =
    Arc<dyn Fn(ActionContext) -> BoxFuture<'static, Result<ActionResult>> + Send + Sync>;
pub type FormLoader =
    Arc<dyn Fn(ActionContext) -> BoxFuture<'static, Result<RecordData>> + Send + Sync>;

/// What an action handler sees: who runs it, with which form values, on
/// which records
#[derive(Clone)]
pub struct ActionContext {
    pub caller: Caller,
    pub form_values: RecordData,
    pub filter: Filter,
    collection: CollectionRef,
}

impl ActionContext {
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Records the action applies to
    pub async fn records(&self, projection: &Projection) -> Result<Vec<RecordData>> {
        self.collection
            .list(
                &self.caller,
                &PaginatedFilter::new(self.filter.clone()),
                projection,
            )
            .await
    }

    /// The record of a single-scoped action
    pub async fn record(&self, projection: &Projection) -> Result<RecordData> {
        let mut records = self.records(projection).await?;
        match records.len() {
            1 => Ok(records.remove(0)),
            count => Err(DataError::validation(format!(
                "Expected one record in '{}', found {}",
                self.collection_name(),
                count
            ))),
        }
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("caller", &self.caller)
            .field("collection", &self.collection_name())
            .field("form_values", &self.form_values)
            .field("filter", &self.filter)
            .finish()
    }
}

#[derive(Clone)]
pub struct ActionDefinition {
    pub scope: ActionScope,
    pub generate_file: bool,
    pub form: Vec<ActionField>,
    handler: ActionHandler,
    loader: Option<FormLoader>,
}

impl ActionDefinition {
    pub fn new<F, Fut>(scope: ActionScope, handler: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult>> + Send + 'static,
    {
        Self {
            scope,
            generate_file: false,
            form: Vec::new(),
            handler: Arc::new(move |context: ActionContext| handler(context).boxed()),
            loader: None,
        }
    }

    pub fn with_form(mut self, form: Vec<ActionField>) -> Self {
        self.form = form;
        self
    }

    pub fn generate_file(mut self) -> Self {
        self.generate_file = true;
        self
    }

    /// Compute initial form values from the selected records
    pub fn with_form_loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RecordData>> + Send + 'static,
    {
        self.loader = Some(Arc::new(move |context: ActionContext| {
            loader(context).boxed()
        }));
        self
    }

    /// Submitted values completed with defaults, checked against the form
    fn form_values(&self, name: &str, submitted: &RecordData) -> Result<RecordData> {
        let mut values = RecordData::new();

        for key in submitted.keys() {
            if !self.form.iter().any(|field| &field.label == key) {
                return Err(DataError::validation(format!(
                    "Action '{}' has no form field '{}'",
                    name, key
                )));
            }
        }

        for field in &self.form {
            let value = submitted
                .get(&field.label)
                .filter(|value| !value.is_null())
                .or(field.default_value.as_ref())
                .cloned()
                .unwrap_or(Value::Null);
            if field.is_required && value.is_null() {
                return Err(DataError::validation(format!(
                    "Field '{}' of action '{}' is required",
                    field.label, name
                )));
            }
            values.insert(field.label.clone(), value);
        }

        Ok(values)
    }
}

impl std::fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("scope", &self.scope)
            .field("generate_file", &self.generate_file)
            .field("form", &self.form)
            .finish()
    }
}

pub struct ActionCollection {
    child: CollectionRef,
    actions: BTreeMap<String, ActionDefinition>,
    base_filter: Filter,
    schema: CollectionSchema,
}

impl ActionCollection {
    pub fn new(
        child: CollectionRef,
        actions: BTreeMap<String, ActionDefinition>,
        base_filter: Filter,
    ) -> Self {
        let mut schema = child.schema().clone();
        for (name, action) in &actions {
            schema = schema.with_action(
                name.clone(),
                ActionSchema {
                    scope: action.scope,
                    generate_file: action.generate_file,
                },
            );
        }

        Self {
            child,
            actions,
            base_filter,
            schema,
        }
    }

    fn context(&self, caller: &Caller, form_values: RecordData, filter: Filter) -> ActionContext {
        ActionContext {
            caller: caller.clone(),
            form_values,
            filter,
            collection: self.child.clone(),
        }
    }
}

#[async_trait]
impl Collection for ActionCollection {
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
        self.child.list(caller, filter, projection).await
    }

    async fn create(&self, caller: &Caller, data: Vec<RecordData>) -> Result<Vec<RecordData>> {
        self.child.create(caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &RecordData) -> Result<()> {
        self.child.update(caller, filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> Result<()> {
        self.child.delete(caller, filter).await
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
        let Some(action) = self.actions.get(name) else {
            return self.child.execute(caller, name, form_values, filter).await;
        };

        let values = action.form_values(name, form_values)?;
        debug!("Running action '{}' on '{}'", name, self.name());
        (action.handler)(self.context(caller, values, filter.clone())).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        form_values: Option<&RecordData>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ActionField>> {
        let Some(action) = self.actions.get(name) else {
            return self.child.get_form(caller, name, form_values, filter).await;
        };

        let mut values = match &action.loader {
            Some(loader) => {
                let filter = filter.cloned().unwrap_or_else(|| self.base_filter.clone());
                loader(self.context(caller, RecordData::new(), filter)).await?
            }
            None => RecordData::new(),
        };
        if let Some(submitted) = form_values {
            values.extend(submitted.iter().map(|(key, value)| (key.clone(), value.clone())));
        }

        Ok(action
            .form
            .iter()
            .map(|field| {
                let mut field = field.clone();
                field.value = values
                    .get(&field.label)
                    .filter(|value| !value.is_null())
                    .cloned()
                    .or_else(|| field.default_value.clone());
                field
            })
            .collect())
    }
}

/// Build a layer adding `actions` (collection -> name -> definition)
pub(crate) fn layer(
    child: &Arc<Datasource>,
    mut actions: HashMap<String, BTreeMap<String, ActionDefinition>>,
    base_filter: Filter,
) -> Result<Arc<Datasource>> {
    for (collection, definitions) in &actions {
        let schema = child.collection(collection)?.schema();
        for name in definitions.keys() {
            if schema.actions.contains_key(name) {
                return Err(DataError::validation(format!(
                    "Action '{}' already exists on '{}'",
                    name, collection
                )));
            }
        }
    }

    wrap(child, |collection| {
        let definitions = actions.remove(collection.name()).unwrap_or_default();
        Ok(Some(Arc::new(ActionCollection::new(
            collection.clone(),
            definitions,
            base_filter.clone(),
        )) as CollectionRef))
    })
}
