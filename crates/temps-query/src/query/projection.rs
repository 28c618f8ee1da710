use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{DataError, Result};
use crate::record::{split_path, PATH_SEPARATOR};
use crate::schema::CollectionSchema;
use crate::types::RecordData;

/// Ordered, duplicate-free list of field paths to retrieve.
///
/// Columns of the collection are plain names, columns of related records use
/// the `relation:field` syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection(Vec<String>);

impl Projection {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut projection = Projection::default();
        projection.extend(fields);
        projection
    }

    fn extend<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.0.contains(&field) {
                self.0.push(field);
            }
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.iter().any(|f| f == field)
    }

    /// Fields of the collection itself
    pub fn columns(&self) -> Vec<&str> {
        self.iter().filter(|f| !f.contains(PATH_SEPARATOR)).collect()
    }

    /// Sub-projections grouped by relation name
    pub fn relations(&self) -> BTreeMap<String, Projection> {
        let mut relations: BTreeMap<String, Projection> = BTreeMap::new();
        for field in self.iter() {
            if let (prefix, Some(rest)) = split_path(field) {
                relations
                    .entry(prefix.to_string())
                    .or_default()
                    .extend([rest]);
            }
        }
        relations
    }

    /// Add the primary keys of the collection
    pub fn with_pks(&self, schema: &CollectionSchema) -> Projection {
        self.union(&Projection::new(schema.primary_keys()))
    }

    pub fn union(&self, other: &Projection) -> Projection {
        let mut merged = self.clone();
        merged.extend(other.iter());
        merged
    }

    /// Prefix every field with a relation name
    pub fn nest(&self, prefix: &str) -> Projection {
        Projection::new(
            self.iter()
                .map(|field| format!("{}{}{}", prefix, PATH_SEPARATOR, field)),
        )
    }

    /// Strip the relation prefix shared by every field
    pub fn unnest(&self) -> Result<Projection> {
        let Some(first) = self.0.first() else {
            return Ok(self.clone());
        };

        let (prefix, rest) = split_path(first);
        if rest.is_none() {
            return Err(DataError::validation("Cannot unnest projection"));
        }

        let nested_prefix = format!("{}{}", prefix, PATH_SEPARATOR);
        let mut fields = Vec::with_capacity(self.len());
        for field in self.iter() {
            match field.strip_prefix(&nested_prefix) {
                Some(rest) => fields.push(rest.to_string()),
                None => return Err(DataError::validation("Cannot unnest projection")),
            }
        }

        Ok(Projection::new(fields))
    }

    /// Replace each field by the fields returned by `handler`
    pub fn replace<F, I>(&self, mut handler: F) -> Projection
    where
        F: FnMut(&str) -> I,
        I: IntoIterator<Item = String>,
    {
        let mut replaced = Projection::default();
        for field in self.iter() {
            replaced.extend(handler(field));
        }
        replaced
    }

    /// Fallible variant of [`Projection::replace`]
    pub fn try_replace<F, I>(&self, mut handler: F) -> Result<Projection>
    where
        F: FnMut(&str) -> Result<I>,
        I: IntoIterator<Item = String>,
    {
        let mut replaced = Projection::default();
        for field in self.iter() {
            replaced.extend(handler(field)?);
        }
        Ok(replaced)
    }

    /// Keep only the projected fields of a record. Missing columns become
    /// null, null relations stay null.
    pub fn apply_record(&self, record: &RecordData) -> RecordData {
        let mut projected = Map::new();

        for column in self.columns() {
            let value = record.get(column).cloned().unwrap_or(Value::Null);
            projected.insert(column.to_string(), value);
        }

        for (relation, sub_projection) in self.relations() {
            let value = match record.get(&relation) {
                Some(Value::Object(nested)) => Value::Object(sub_projection.apply_record(nested)),
                Some(Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Object(nested) => {
                                Value::Object(sub_projection.apply_record(nested))
                            }
                            other => other.clone(),
                        })
                        .collect(),
                ),
                _ => Value::Null,
            };
            projected.insert(relation, value);
        }

        projected
    }

    pub fn apply(&self, records: Vec<RecordData>) -> Vec<RecordData> {
        records.iter().map(|record| self.apply_record(record)).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Projection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Projection::new(iter)
    }
}
