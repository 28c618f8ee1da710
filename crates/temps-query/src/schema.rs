//! Capability declaration of a collection: which fields it has, which
//! operators and sorts each column supports natively, its relations,
//! segments and actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DataError, Result};
use crate::query::operator::Operator;
use crate::types::{ActionScope, ColumnType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column_type: ColumnType,
    /// Operators the collection can evaluate on this column
    #[serde(default)]
    pub filter_operators: BTreeSet<Operator>,
    #[serde(default)]
    pub is_sortable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

impl ColumnSchema {
    /// Column without any native filtering or sorting capability
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            filter_operators: BTreeSet::new(),
            is_sortable: false,
            is_primary_key: false,
            is_read_only: false,
            default_value: None,
            enum_values: Vec::new(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.is_sortable = true;
        self
    }

    pub fn with_operators(mut self, operators: impl IntoIterator<Item = Operator>) -> Self {
        self.filter_operators.extend(operators);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_enum_values(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Link between two collections of the same datasource.
///
/// - `ManyToOne`: local `foreign_key` references `foreign_key_target` on the
///   foreign collection.
/// - `OneToOne` / `OneToMany`: foreign `origin_key` references the local
///   `origin_key_target`.
/// - `ManyToMany`: the through collection holds `origin_key` (referencing the
///   local `origin_key_target`) and `foreign_key` (referencing the foreign
///   `foreign_key_target`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RelationSchema {
    ManyToOne {
        foreign_collection: String,
        foreign_key: String,
        foreign_key_target: String,
    },
    OneToOne {
        foreign_collection: String,
        origin_key: String,
        origin_key_target: String,
    },
    OneToMany {
        foreign_collection: String,
        origin_key: String,
        origin_key_target: String,
    },
    ManyToMany {
        foreign_collection: String,
        through_collection: String,
        foreign_key: String,
        foreign_key_target: String,
        origin_key: String,
        origin_key_target: String,
    },
}

impl RelationSchema {
    pub fn foreign_collection(&self) -> &str {
        match self {
            RelationSchema::ManyToOne {
                foreign_collection, ..
            }
            | RelationSchema::OneToOne {
                foreign_collection, ..
            }
            | RelationSchema::OneToMany {
                foreign_collection, ..
            }
            | RelationSchema::ManyToMany {
                foreign_collection, ..
            } => foreign_collection,
        }
    }

    pub fn through_collection(&self) -> Option<&str> {
        match self {
            RelationSchema::ManyToMany {
                through_collection, ..
            } => Some(through_collection),
            _ => None,
        }
    }

    pub fn is_to_many(&self) -> bool {
        matches!(
            self,
            RelationSchema::OneToMany { .. } | RelationSchema::ManyToMany { .. }
        )
    }

    /// Local column whose value identifies the related records
    pub fn local_key(&self) -> &str {
        match self {
            RelationSchema::ManyToOne { foreign_key, .. } => foreign_key,
            RelationSchema::OneToOne {
                origin_key_target, ..
            }
            | RelationSchema::OneToMany {
                origin_key_target, ..
            }
            | RelationSchema::ManyToMany {
                origin_key_target, ..
            } => origin_key_target,
        }
    }

    /// Column of the foreign collection matched against the local key.
    /// For `ManyToMany` this is the key of the foreign collection referenced
    /// by the through collection.
    pub fn foreign_join_key(&self) -> &str {
        match self {
            RelationSchema::ManyToOne {
                foreign_key_target, ..
            }
            | RelationSchema::ManyToMany {
                foreign_key_target, ..
            } => foreign_key_target,
            RelationSchema::OneToOne { origin_key, .. }
            | RelationSchema::OneToMany { origin_key, .. } => origin_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldSchema {
    Column(ColumnSchema),
    Relation(RelationSchema),
}

impl From<ColumnSchema> for FieldSchema {
    fn from(column: ColumnSchema) -> Self {
        FieldSchema::Column(column)
    }
}

impl From<RelationSchema> for FieldSchema {
    fn from(relation: RelationSchema) -> Self {
        FieldSchema::Relation(relation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub scope: ActionScope,
    #[serde(default)]
    pub generate_file: bool,
}

impl ActionSchema {
    pub fn new(scope: ActionScope) -> Self {
        Self {
            scope,
            generate_file: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: BTreeMap<String, FieldSchema>,
    #[serde(default)]
    pub segments: BTreeSet<String>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSchema>,
    /// Whether the collection evaluates `Filter::search` natively
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub countable: bool,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, field: impl Into<FieldSchema>) -> Self {
        self.fields.insert(name.into(), field.into());
        self
    }

    pub fn with_segment(mut self, name: impl Into<String>) -> Self {
        self.segments.insert(name.into());
        self
    }

    pub fn with_action(mut self, name: impl Into<String>, action: ActionSchema) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn countable(mut self) -> Self {
        self.countable = true;
        self
    }

    /// Primary key columns, in field order
    pub fn primary_keys(&self) -> Vec<&str> {
        self.columns()
            .filter(|(_, column)| column.is_primary_key)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnSchema)> {
        self.fields.iter().filter_map(|(name, field)| match field {
            FieldSchema::Column(column) => Some((name.as_str(), column)),
            FieldSchema::Relation(_) => None,
        })
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationSchema)> {
        self.fields.iter().filter_map(|(name, field)| match field {
            FieldSchema::Relation(relation) => Some((name.as_str(), relation)),
            FieldSchema::Column(_) => None,
        })
    }

    pub fn column(&self, name: &str) -> Result<&ColumnSchema> {
        match self.fields.get(name) {
            Some(FieldSchema::Column(column)) => Ok(column),
            Some(FieldSchema::Relation(_)) => Err(DataError::validation(format!(
                "'{}' is a relation, not a column",
                name
            ))),
            None => Err(DataError::validation(format!("Column not found: '{}'", name))),
        }
    }

    pub fn relation(&self, name: &str) -> Result<&RelationSchema> {
        match self.fields.get(name) {
            Some(FieldSchema::Relation(relation)) => Ok(relation),
            Some(FieldSchema::Column(_)) => Err(DataError::validation(format!(
                "'{}' is a column, not a relation",
                name
            ))),
            None => Err(DataError::validation(format!("Relation not found: '{}'", name))),
        }
    }
}
