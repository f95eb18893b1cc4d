//! Per-partition view of an entity definition.

use std::sync::Arc;

use super::{EntityDef, FieldDef, IdentifierGenerator, OrderBy, RelationshipDef};
use crate::error::Error;
use crate::partition::Partition;

/// An entity definition specialized to one partition.
///
/// Scanners, controllers and stores resolve every field, index and
/// relationship through a descriptor.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    def: Arc<EntityDef>,
    partition: Partition,
}

impl EntityDescriptor {
    /// Create a descriptor for a partition.
    pub fn new(def: Arc<EntityDef>, partition: Partition) -> Self {
        Self { def, partition }
    }

    /// The same entity in another partition.
    pub fn with_partition(&self, partition: Partition) -> Self {
        Self {
            def: Arc::clone(&self.def),
            partition,
        }
    }

    /// Underlying entity definition.
    pub fn def(&self) -> &Arc<EntityDef> {
        &self.def
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Partition this descriptor is specialized to.
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Name of the identifier field.
    pub fn identifier_field(&self) -> &str {
        &self.def.identity_field
    }

    /// Whether `name` is the identifier field.
    pub fn is_identifier(&self, name: &str) -> bool {
        self.def.identity_field == name
    }

    /// Identifier assignment.
    pub fn generator(&self) -> IdentifierGenerator {
        self.def.generator
    }

    /// Declared attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&FieldDef> {
        self.def.get_field(name)
    }

    /// Declared attribute, or `AttributeMissing`.
    pub fn require_attribute(&self, name: &str) -> Result<&FieldDef, Error> {
        self.attribute(name)
            .ok_or_else(|| Error::attribute_missing(self.name(), name))
    }

    /// All declared attributes.
    pub fn attributes(&self) -> &[FieldDef] {
        &self.def.fields
    }

    /// Declared attribute that carries a secondary index.
    pub fn index(&self, name: &str) -> Option<&FieldDef> {
        self.attribute(name).filter(|f| f.indexed)
    }

    /// All indexed attributes.
    pub fn indexes(&self) -> impl Iterator<Item = &FieldDef> {
        self.def.indexed_fields()
    }

    /// Declared relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.def.get_relationship(name)
    }

    /// Declared relationship, or `AttributeMissing`.
    pub fn require_relationship(&self, name: &str) -> Result<&RelationshipDef, Error> {
        self.relationship(name)
            .ok_or_else(|| Error::attribute_missing(self.name(), name))
    }

    /// All declared relationships.
    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.def.relationships
    }

    /// Field whose value selects the partition, if any.
    pub fn partition_field(&self) -> Option<&str> {
        self.def.partition_field.as_deref()
    }

    /// Natural ordering of the entity.
    pub fn default_order(&self) -> &[OrderBy] {
        &self.def.lifecycle.default_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, ScalarType};

    #[test]
    fn test_descriptor_lookup() {
        let def = Arc::new(
            EntityDef::new("Item", "id")
                .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
                .with_field(FieldDef::new("sku", FieldType::scalar(ScalarType::String)).with_index())
                .with_field(FieldDef::new("note", FieldType::scalar(ScalarType::String))),
        );
        let descriptor = EntityDescriptor::new(def, Partition::None);

        assert!(descriptor.is_identifier("id"));
        assert!(descriptor.index("sku").is_some());
        assert!(descriptor.index("note").is_none());
        assert!(descriptor.attribute("note").is_some());
        assert!(matches!(
            descriptor.require_attribute("missing"),
            Err(Error::AttributeMissing { .. })
        ));

        let moved = descriptor.with_partition(Partition::Id(3));
        assert_eq!(moved.partition(), Partition::Id(3));
        assert_eq!(moved.name(), "Item");
    }
}
