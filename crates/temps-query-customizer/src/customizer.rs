//! Builder assembling the decorator stack over a datasource.
//!
//! Customizations are declared per collection with the backend's collection
//! and field names, then [`DatasourceCustomizer::build`] stacks the layers
//! in a fixed order:
//!
//! backend → empty → early computed → early operators → relation →
//! late computed → late operators → search → segment → sort → action →
//! write → validation → publication → rename
//!
//! Computed fields depending only on backend columns (or on other such
//! fields) are installed below the relation layer, so relations may join on
//! them. The others are installed above it and may read related records.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use temps_query::{
    ConditionTree, ConditionTreeLeaf, Datasource, Operator, RecordData, RelationSchema, Result,
    Sort,
};
use tracing::{debug, info, warn};

use crate::config::CustomizerOptions;
use crate::decorators::{
    action, computed, empty, operators, publication, relation, rename, search, segment, sort,
    validation, write, ActionDefinition, ComputedDefinition, SearchHandler, SegmentDefinition,
    WriteHandler,
};

/// Computed fields as (collection, name, definition)
type ComputedFields = Vec<(String, String, ComputedDefinition)>;

/// Customizations of one collection
#[derive(Default)]
pub struct CollectionCustomizer {
    name: String,
    computed: Vec<(String, ComputedDefinition)>,
    relations: Vec<(String, RelationSchema)>,
    segments: BTreeMap<String, SegmentDefinition>,
    search: Option<SearchHandler>,
    sorts: BTreeMap<String, Sort>,
    writes: BTreeMap<String, WriteHandler>,
    validations: Vec<ConditionTreeLeaf>,
    actions: BTreeMap<String, ActionDefinition>,
    renames: BTreeMap<String, String>,
    hidden: BTreeSet<String>,
}

impl CollectionCustomizer {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a computed field. Its dependencies must already exist, either on
    /// the backend or as previously added fields.
    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        definition: ComputedDefinition,
    ) -> &mut Self {
        self.computed.push((name.into(), definition));
        self
    }

    /// Add a relation emulated by stitching records of both collections
    pub fn add_relation(&mut self, name: impl Into<String>, relation: RelationSchema) -> &mut Self {
        self.relations.push((name.into(), relation));
        self
    }

    /// Relation to the record of `foreign_collection` whose
    /// `foreign_key_target` equals this collection's `foreign_key`
    pub fn add_many_to_one_relation(
        &mut self,
        name: impl Into<String>,
        foreign_collection: impl Into<String>,
        foreign_key: impl Into<String>,
        foreign_key_target: impl Into<String>,
    ) -> &mut Self {
        self.add_relation(
            name,
            RelationSchema::ManyToOne {
                foreign_collection: foreign_collection.into(),
                foreign_key: foreign_key.into(),
                foreign_key_target: foreign_key_target.into(),
            },
        )
    }

    /// Relation to the records of `foreign_collection` whose `origin_key`
    /// equals this collection's `origin_key_target`
    pub fn add_one_to_many_relation(
        &mut self,
        name: impl Into<String>,
        foreign_collection: impl Into<String>,
        origin_key: impl Into<String>,
        origin_key_target: impl Into<String>,
    ) -> &mut Self {
        self.add_relation(
            name,
            RelationSchema::OneToMany {
                foreign_collection: foreign_collection.into(),
                origin_key: origin_key.into(),
                origin_key_target: origin_key_target.into(),
            },
        )
    }

    pub fn add_one_to_one_relation(
        &mut self,
        name: impl Into<String>,
        foreign_collection: impl Into<String>,
        origin_key: impl Into<String>,
        origin_key_target: impl Into<String>,
    ) -> &mut Self {
        self.add_relation(
            name,
            RelationSchema::OneToOne {
                foreign_collection: foreign_collection.into(),
                origin_key: origin_key.into(),
                origin_key_target: origin_key_target.into(),
            },
        )
    }

    pub fn add_segment(
        &mut self,
        name: impl Into<String>,
        definition: impl Into<SegmentDefinition>,
    ) -> &mut Self {
        let name = name.into();
        if self.segments.insert(name.clone(), definition.into()).is_some() {
            warn!("Segment '{}' of '{}' was declared twice", name, self.name);
        }
        self
    }

    /// Build the search condition of this collection with `handler`,
    /// called with the search string and whether the search is extended
    pub fn replace_search<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str, bool) -> Result<ConditionTree> + Send + Sync + 'static,
    {
        if self.search.replace(Arc::new(handler)).is_some() {
            warn!("Search of '{}' was replaced twice", self.name);
        }
        self
    }

    /// Sort on `field` with `sort` instead. Descending clauses invert it.
    pub fn replace_field_sorting(&mut self, field: impl Into<String>, sort: Sort) -> &mut Self {
        let field = field.into();
        if self.sorts.insert(field.clone(), sort).is_some() {
            warn!("Sorting of '{}' on '{}' was replaced twice", field, self.name);
        }
        self
    }

    /// Turn values written to `field` into a patch over other fields
    pub fn replace_field_writing<F>(&mut self, field: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Value, &RecordData) -> Result<RecordData> + Send + Sync + 'static,
    {
        let field = field.into();
        if self.writes.insert(field.clone(), Arc::new(handler)).is_some() {
            warn!("Writing of '{}' on '{}' was replaced twice", field, self.name);
        }
        self
    }

    /// Reject created records and patches whose `field` does not satisfy
    /// `operator` with `value`
    pub fn add_field_validation(
        &mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Option<Value>>,
    ) -> &mut Self {
        self.validations
            .push(ConditionTreeLeaf::new(field, operator, value));
        self
    }

    pub fn add_action(
        &mut self,
        name: impl Into<String>,
        definition: ActionDefinition,
    ) -> &mut Self {
        let name = name.into();
        if self.actions.insert(name.clone(), definition).is_some() {
            warn!("Action '{}' of '{}' was declared twice", name, self.name);
        }
        self
    }

    pub fn rename_field(
        &mut self,
        current: impl Into<String>,
        new_name: impl Into<String>,
    ) -> &mut Self {
        self.renames.insert(current.into(), new_name.into());
        self
    }

    /// Hide a field. Relations joining on it are hidden too.
    pub fn remove_field(&mut self, name: impl Into<String>) -> &mut Self {
        self.hidden.insert(name.into());
        self
    }
}

/// Declares customizations over a datasource and builds the decorated one.
///
/// ```rust,ignore
/// let mut customizer = DatasourceCustomizer::new(datasource);
/// customizer
///     .customize_collection("books")
///     .add_many_to_one_relation("author", "authors", "authorId", "id")
///     .rename_field("authorId", "writerId");
/// let datasource = customizer.build()?;
/// ```
pub struct DatasourceCustomizer {
    datasource: Arc<Datasource>,
    options: CustomizerOptions,
    collections: BTreeMap<String, CollectionCustomizer>,
    renamed_collections: HashMap<String, String>,
    hidden_collections: BTreeSet<String>,
}

impl DatasourceCustomizer {
    pub fn new(datasource: impl Into<Arc<Datasource>>) -> Self {
        Self {
            datasource: datasource.into(),
            options: CustomizerOptions::default(),
            collections: BTreeMap::new(),
            renamed_collections: HashMap::new(),
            hidden_collections: BTreeSet::new(),
        }
    }

    pub fn with_options(mut self, options: CustomizerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CustomizerOptions {
        &self.options
    }

    /// Customizations of the backend collection `name`. Unknown names are
    /// reported by [`DatasourceCustomizer::build`].
    pub fn customize_collection(&mut self, name: &str) -> &mut CollectionCustomizer {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| CollectionCustomizer::new(name))
    }

    pub fn rename_collection(
        &mut self,
        current: impl Into<String>,
        new_name: impl Into<String>,
    ) -> &mut Self {
        self.renamed_collections.insert(current.into(), new_name.into());
        self
    }

    /// Hide a collection and every relation reaching it
    pub fn remove_collection(&mut self, name: impl Into<String>) -> &mut Self {
        self.hidden_collections.insert(name.into());
        self
    }

    /// Stack every layer over the datasource
    pub fn build(self) -> Result<Arc<Datasource>> {
        self.options.validate()?;
        let names = self
            .collections
            .keys()
            .chain(self.renamed_collections.keys())
            .chain(self.hidden_collections.iter());
        for name in names {
            self.datasource.collection(name)?;
        }

        info!(
            "Building customized datasource over {} collections ({} customized)",
            self.datasource.collections().len(),
            self.collections.len()
        );

        let (early, late) = self.split_computed()?;
        let base_filter = self.options.base_filter();
        let max_depth = self.options.max_relation_depth;
        let extended_search_depth = self.options.extended_search_depth;

        let mut relations = Vec::new();
        let mut searches = HashMap::new();
        let mut segments = HashMap::new();
        let mut sorts = HashMap::new();
        let mut actions = HashMap::new();
        let mut writes = HashMap::new();
        let mut validations = Vec::new();
        let mut hidden_fields = HashMap::new();
        let mut renamed_fields = HashMap::new();

        for (name, customizer) in self.collections {
            let CollectionCustomizer {
                relations: collection_relations,
                segments: collection_segments,
                search,
                sorts: collection_sorts,
                writes: collection_writes,
                validations: collection_validations,
                actions: collection_actions,
                renames,
                hidden,
                ..
            } = customizer;

            relations.extend(
                collection_relations
                    .into_iter()
                    .map(|(field, schema)| (name.clone(), field, schema)),
            );
            validations.extend(
                collection_validations
                    .into_iter()
                    .map(|rule| (name.clone(), rule)),
            );
            if let Some(handler) = search {
                searches.insert(name.clone(), handler);
            }
            segments.insert(name.clone(), collection_segments);
            sorts.insert(name.clone(), collection_sorts);
            actions.insert(name.clone(), collection_actions);
            writes.insert(name.clone(), collection_writes);
            hidden_fields.insert(name.clone(), hidden);
            renamed_fields.insert(name, renames);
        }

        let layer = empty::layer(&self.datasource)?;
        let layer = computed::layer(&layer, early)?;
        let layer = operators::layer(&layer)?;
        let layer = relation::layer(&layer, relations, max_depth)?;
        let layer = computed::layer(&layer, late)?;
        let layer = operators::layer(&layer)?;
        let layer = search::layer(&layer, searches, extended_search_depth)?;
        let layer = segment::layer(&layer, segments)?;
        let layer = sort::layer(&layer, sorts)?;
        let layer = action::layer(&layer, actions, base_filter)?;
        let layer = write::layer(&layer, writes)?;
        let layer = validation::layer(&layer, validations)?;
        let layer = publication::layer(&layer, self.hidden_collections, hidden_fields)?;
        let layer = rename::layer(&layer, self.renamed_collections, renamed_fields)?;

        info!(
            "Customized datasource ready with {} collections",
            layer.collections().len()
        );
        Ok(layer)
    }

    /// Split computed fields between the layers below and above relations.
    /// A field goes below when each dependency is a backend column or a
    /// field already placed below.
    fn split_computed(&self) -> Result<(ComputedFields, ComputedFields)> {
        let mut early = Vec::new();
        let mut late = Vec::new();

        for (collection, customizer) in &self.collections {
            let schema = self.datasource.collection(collection)?.schema();
            let mut placed_early: HashSet<&str> = HashSet::new();

            for (name, definition) in &customizer.computed {
                let below = definition.has_local_dependencies()
                    && definition.dependencies.iter().all(|dependency| {
                        schema.column(dependency).is_ok()
                            || placed_early.contains(dependency.as_str())
                    });

                let entry = (collection.clone(), name.clone(), definition.clone());
                if below {
                    debug!("Computed field '{}' of '{}' goes below relations", name, collection);
                    placed_early.insert(name.as_str());
                    early.push(entry);
                } else {
                    late.push(entry);
                }
            }
        }

        Ok((early, late))
    }
}

impl std::fmt::Debug for DatasourceCustomizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasourceCustomizer")
            .field("options", &self.options)
            .field("collections", &self.collections.keys().collect::<Vec<_>>())
            .field("renamed_collections", &self.renamed_collections)
            .field("hidden_collections", &self.hidden_collections)
            .finish()
    }
}
