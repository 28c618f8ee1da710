use crate::error::{DataError, Result};
use crate::schema::{CollectionSchema, RelationSchema};
use crate::traits::Collection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Ordered set of named collections sharing one namespace.
///
/// Relations between collections are resolved by name inside the datasource.
pub struct Datasource {
    collections: Vec<Arc<dyn Collection>>,
    index: HashMap<String, usize>,
}

impl Datasource {
    /// Build a datasource, checking that names are unique and that every
    /// relation points to existing collections and columns
    pub fn new(collections: Vec<Arc<dyn Collection>>) -> Result<Self> {
        let datasource = Self::new_unchecked(collections)?;
        datasource.validate_relations()?;
        Ok(datasource)
    }

    /// Build a datasource checking only name uniqueness.
    ///
    /// Used while assembling decorator layers, whose relations are validated
    /// once the whole layer exists.
    pub fn new_unchecked(collections: Vec<Arc<dyn Collection>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(collections.len());

        for (position, collection) in collections.iter().enumerate() {
            if index.insert(collection.name().to_string(), position).is_some() {
                return Err(DataError::validation(format!(
                    "Collection '{}' is declared twice",
                    collection.name()
                )));
            }
        }

        debug!("Created datasource with {} collections", collections.len());
        Ok(Self { collections, index })
    }

    /// Datasource over collections wrapping this one's, one for one and in
    /// the same order, so names and indices carry over unchanged
    pub fn wrap_collections(&self, collections: Vec<Arc<dyn Collection>>) -> Self {
        debug_assert_eq!(collections.len(), self.collections.len());
        Self {
            collections,
            index: self.index.clone(),
        }
    }

    /// Check every relation of every collection
    pub fn validate_relations(&self) -> Result<()> {
        for collection in &self.collections {
            for (name, relation) in collection.schema().relations() {
                self.validate_relation(collection.name(), collection.schema(), name, relation)?;
            }
        }
        Ok(())
    }

    fn require_column(
        &self,
        schema: &CollectionSchema,
        collection: &str,
        column: &str,
        relation: &str,
    ) -> Result<()> {
        schema.column(column).map(|_| ()).map_err(|_| {
            DataError::validation(format!(
                "Relation '{}' uses '{}.{}' which is not a column",
                relation, collection, column
            ))
        })
    }

    fn validate_relation(
        &self,
        collection: &str,
        schema: &CollectionSchema,
        name: &str,
        relation: &RelationSchema,
    ) -> Result<()> {
        let relation_name = format!("{}.{}", collection, name);
        let foreign = self.collection(relation.foreign_collection()).map_err(|_| {
            DataError::validation(format!(
                "Relation '{}' targets unknown collection '{}'",
                relation_name,
                relation.foreign_collection()
            ))
        })?;
        let foreign_name = relation.foreign_collection();

        match relation {
            RelationSchema::ManyToOne {
                foreign_key,
                foreign_key_target,
                ..
            } => {
                self.require_column(schema, collection, foreign_key, &relation_name)?;
                self.require_column(
                    foreign.schema(),
                    foreign_name,
                    foreign_key_target,
                    &relation_name,
                )?;
            }
            RelationSchema::OneToOne {
                origin_key,
                origin_key_target,
                ..
            }
            | RelationSchema::OneToMany {
                origin_key,
                origin_key_target,
                ..
            } => {
                self.require_column(foreign.schema(), foreign_name, origin_key, &relation_name)?;
                self.require_column(schema, collection, origin_key_target, &relation_name)?;
            }
            RelationSchema::ManyToMany {
                through_collection,
                foreign_key,
                foreign_key_target,
                origin_key,
                origin_key_target,
                ..
            } => {
                let through = self.collection(through_collection).map_err(|_| {
                    DataError::validation(format!(
                        "Relation '{}' goes through unknown collection '{}'",
                        relation_name, through_collection
                    ))
                })?;
                let through = through.schema();
                self.require_column(through, through_collection, foreign_key, &relation_name)?;
                self.require_column(through, through_collection, origin_key, &relation_name)?;
                self.require_column(
                    foreign.schema(),
                    foreign_name,
                    foreign_key_target,
                    &relation_name,
                )?;
                self.require_column(schema, collection, origin_key_target, &relation_name)?;
            }
        }

        Ok(())
    }

    pub fn collections(&self) -> &[Arc<dyn Collection>] {
        &self.collections
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|c| c.name())
    }

    /// Get a collection by name
    pub fn collection(&self, name: &str) -> Result<&Arc<dyn Collection>> {
        self.collection_index(name)
            .and_then(|index| self.collections.get(index))
            .ok_or_else(|| DataError::not_found(format!("Collection '{}' not found", name)))
    }

    pub fn collection_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn collection_at(&self, index: usize) -> Option<&Arc<dyn Collection>> {
        self.collections.get(index)
    }
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("collections", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;
    use crate::test_utils::StubCollection;
    use crate::types::ColumnType;

    fn authors() -> Arc<dyn Collection> {
        StubCollection::arc(
            "authors",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::new(ColumnType::Number).primary_key()),
        )
    }

    fn books(foreign_key_target: &str) -> Arc<dyn Collection> {
        StubCollection::arc(
            "books",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::new(ColumnType::Number).primary_key())
                .with_field("authorId", ColumnSchema::new(ColumnType::Number))
                .with_field(
                    "author",
                    RelationSchema::ManyToOne {
                        foreign_collection: "authors".into(),
                        foreign_key: "authorId".into(),
                        foreign_key_target: foreign_key_target.into(),
                    },
                ),
        )
    }

    #[test]
    fn test_lookup_by_name_and_index() {
        let datasource = Datasource::new(vec![authors(), books("id")]).unwrap();

        assert_eq!(datasource.collection_index("books"), Some(1));
        assert_eq!(datasource.collection_at(0).unwrap().name(), "authors");
        assert!(datasource.collection("missing").unwrap_err().is_not_found());
        assert_eq!(
            format!("{:?}", datasource.collection("books").unwrap()),
            r#"Collection { name: "books" }"#
        );
        assert_eq!(datasource.names().collect::<Vec<_>>(), vec!["authors", "books"]);
    }

    #[test]
    fn test_duplicate_names_fail() {
        let result = Datasource::new(vec![authors(), authors()]);
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_relation_integrity() {
        assert!(Datasource::new(vec![books("id")]).unwrap_err().is_validation());
        assert!(Datasource::new(vec![authors(), books("uuid")]).is_err());
        assert!(Datasource::new_unchecked(vec![books("uuid")]).is_ok());
    }
}
