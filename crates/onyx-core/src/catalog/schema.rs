//! Schema bundle - versioned snapshot of the entire schema.

use super::EntityDef;
use crate::error::Error;
use onyx_proto::PATH_SEPARATOR;
use rkyv::{Archive, Deserialize, Serialize};
use std::collections::HashMap;

/// A versioned snapshot of the entire schema.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Schema version (monotonically increasing).
    pub version: u64,
    /// Creation timestamp (microseconds since Unix epoch).
    pub created_at: u64,
    /// Entity definitions keyed by name.
    pub entities: HashMap<String, EntityDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            created_at: crate::storage::key::current_timestamp(),
            entities: HashMap::new(),
        }
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(|s| s.as_str()).collect()
    }

    /// Check that every entity is internally consistent and that every
    /// relationship target and inverse resolves.
    pub fn validate(&self) -> Result<(), Error> {
        for entity in self.entities.values() {
            let invalid = |reason: String| Error::InvalidSchema(format!("{}: {}", entity.name, reason));

            if entity.get_identity_field().is_none() {
                return Err(invalid(format!(
                    "identity field '{}' is not declared",
                    entity.identity_field
                )));
            }
            if let Some(partition) = &entity.partition_field {
                if partition == &entity.identity_field {
                    return Err(invalid("the identity field cannot partition records".into()));
                }
                if entity.get_field(partition).is_none() {
                    return Err(invalid(format!(
                        "partition field '{}' is not declared",
                        partition
                    )));
                }
            }

            let mut names = std::collections::HashSet::new();
            let declared = entity
                .fields
                .iter()
                .map(|f| f.name.as_str())
                .chain(entity.relationships.iter().map(|r| r.name.as_str()));
            for name in declared {
                if name.is_empty() || name.contains(PATH_SEPARATOR) {
                    return Err(invalid(format!("'{}' is not a valid member name", name)));
                }
                if !names.insert(name) {
                    return Err(invalid(format!("'{}' is declared twice", name)));
                }
            }

            for rel in &entity.relationships {
                let target = self.get_entity(&rel.target).ok_or_else(|| {
                    invalid(format!(
                        "relationship '{}' targets unknown entity '{}'",
                        rel.name, rel.target
                    ))
                })?;
                if let Some(inverse_name) = &rel.inverse {
                    let inverse = target.get_relationship(inverse_name).ok_or_else(|| {
                        invalid(format!(
                            "inverse '{}' of relationship '{}' is not declared on '{}'",
                            inverse_name, rel.name, rel.target
                        ))
                    })?;
                    if inverse.target != entity.name {
                        return Err(invalid(format!(
                            "inverse '{}.{}' targets '{}' instead of '{}'",
                            rel.target, inverse_name, inverse.target, entity.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serialize the schema bundle to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a schema bundle from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

impl Default for SchemaBundle {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CascadePolicy, FieldDef, FieldType, RelationshipDef, ScalarType};

    fn sample_schema() -> SchemaBundle {
        let parent = EntityDef::new("Parent", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
            .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
            .with_relationship(
                RelationshipDef::one_to_many("children", "Child")
                    .with_inverse("parent")
                    .with_cascade(CascadePolicy::All),
            );

        let child = EntityDef::new("Child", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
            .with_relationship(RelationshipDef::many_to_one("parent", "Parent").with_inverse("children"));

        SchemaBundle::new(1).with_entity(parent).with_entity(child)
    }

    #[test]
    fn test_schema_bundle_builder() {
        let schema = sample_schema();

        assert_eq!(schema.version, 1);
        assert_eq!(schema.entities.len(), 2);
        assert!(schema.get_entity("Parent").is_some());
        let mut names = schema.entity_names();
        names.sort_unstable();
        assert_eq!(names, vec!["Child", "Parent"]);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_schema_serialization_roundtrip() {
        let schema = sample_schema();
        let bytes = schema.to_bytes().unwrap();
        let restored = SchemaBundle::from_bytes(&bytes).unwrap();
        assert_eq!(schema, restored);
    }

    #[test]
    fn test_validate_missing_identity() {
        let schema = SchemaBundle::new(1).with_entity(
            EntityDef::new("Broken", "id")
                .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String))),
        );
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_validate_unknown_target() {
        let schema = SchemaBundle::new(1).with_entity(
            EntityDef::new("Parent", "id")
                .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
                .with_relationship(RelationshipDef::one_to_one("ghost", "Nowhere")),
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_validate_mismatched_inverse() {
        let schema = sample_schema().with_entity(
            EntityDef::new("Child", "id")
                .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
                .with_relationship(RelationshipDef::many_to_one("parent", "Child")),
        );
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_validate_dotted_member_name() {
        let schema = SchemaBundle::new(1).with_entity(
            EntityDef::new("Parent", "id")
                .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
                .with_field(FieldDef::new("a.b", FieldType::scalar(ScalarType::String))),
        );
        assert!(schema.validate().is_err());
    }
}
