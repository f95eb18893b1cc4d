//! Entity definitions.

use super::field::FieldDef;
use super::relationship::RelationshipDef;
use rkyv::{Archive, Deserialize, Serialize};

/// How identifiers are assigned to new records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Archive, Serialize, Deserialize)]
pub enum IdentifierGenerator {
    /// The caller supplies every identifier.
    #[default]
    None,
    /// The engine assigns the next positive integer from a per-entity sequence.
    Sequence,
}

/// An entity definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Name of the identifier field.
    pub identity_field: String,
    /// Identifier assignment.
    pub generator: IdentifierGenerator,
    /// Field definitions.
    pub fields: Vec<FieldDef>,
    /// Relationship definitions.
    pub relationships: Vec<RelationshipDef>,
    /// Field whose value selects the record's partition.
    pub partition_field: Option<String>,
    /// Lifecycle rules.
    pub lifecycle: LifecycleRules,
}

/// Lifecycle rules for an entity.
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize)]
pub struct LifecycleRules {
    /// Natural ordering applied to materialized collections of this entity.
    pub default_order: Vec<OrderBy>,
}

/// Order specification for default ordering.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field name to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_field: identity_field.into(),
            generator: IdentifierGenerator::None,
            fields: Vec::new(),
            relationships: Vec::new(),
            partition_field: None,
            lifecycle: LifecycleRules::default(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a relationship.
    pub fn with_relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Assign identifiers from a sequence.
    pub fn with_sequence_identifier(mut self) -> Self {
        self.generator = IdentifierGenerator::Sequence;
        self
    }

    /// Partition records by the value of a field.
    pub fn with_partition_field(mut self, field: impl Into<String>) -> Self {
        self.partition_field = Some(field.into());
        self
    }

    /// Add a natural ordering key.
    pub fn with_default_order(mut self, order: OrderBy) -> Self {
        self.lifecycle.default_order.push(order);
        self
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get the identity field definition.
    pub fn get_identity_field(&self) -> Option<&FieldDef> {
        self.get_field(&self.identity_field)
    }

    /// Get a relationship by name.
    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Get all indexed fields.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.indexed)
    }

    /// Check if records of this entity are partitioned.
    pub fn is_partitioned(&self) -> bool {
        self.partition_field.is_some()
    }
}

impl OrderBy {
    /// Create ascending order.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create descending order.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}
