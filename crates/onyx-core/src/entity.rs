//! In-memory entities.
//!
//! An [`Entity`] is a dynamic record: its type name, attribute map and the
//! relationship slots that have been loaded or assigned. Entities are shared
//! through [`EntityHandle`] so that a hydrated graph keeps one instance per
//! record, cycles included.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::reference::PartitionReference;
use crate::relationship::LazyCollection;
use crate::storage::Attributes;
use onyx_proto::Value;

/// Contents of a relationship slot.
///
/// A relationship without a slot has not been loaded; saving leaves its
/// stored edges untouched.
#[derive(Debug, Clone)]
pub enum Related {
    /// A to-one link, possibly empty.
    One(Option<EntityHandle>),
    /// A materialized to-many collection.
    Many(Vec<EntityHandle>),
    /// A to-many collection resolved on first access.
    Lazy(LazyCollection),
}

impl Related {
    /// Number of linked records.
    pub fn len(&self) -> usize {
        match self {
            Related::One(one) => usize::from(one.is_some()),
            Related::Many(many) => many.len(),
            Related::Lazy(lazy) => lazy.len(),
        }
    }

    /// Whether no record is linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The linked record of a to-one slot.
    pub fn as_one(&self) -> Option<&EntityHandle> {
        match self {
            Related::One(one) => one.as_ref(),
            _ => None,
        }
    }

    /// The members of a materialized to-many slot.
    pub fn as_many(&self) -> Option<&[EntityHandle]> {
        match self {
            Related::Many(many) => Some(many),
            _ => None,
        }
    }

    /// The lazy view of an unmaterialized to-many slot.
    pub fn as_lazy(&self) -> Option<&LazyCollection> {
        match self {
            Related::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }
}

/// A dynamic record of one entity type.
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: String,
    attributes: Attributes,
    relationships: BTreeMap<String, Related>,
    stored: Option<PartitionReference>,
}

impl Entity {
    /// Create an empty, unsaved entity.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            attributes: Attributes::new(),
            relationships: BTreeMap::new(),
            stored: None,
        }
    }

    pub(crate) fn from_record(
        entity_type: impl Into<String>,
        attributes: Attributes,
        stored: PartitionReference,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            attributes,
            relationships: BTreeMap::new(),
            stored: Some(stored),
        }
    }

    /// Builder-style attribute assignment.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(attribute, value);
        self
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Attribute value, if set.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// Assign an attribute.
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(attribute.into(), value.into());
    }

    /// Remove an attribute, returning its value.
    pub fn unset(&mut self, attribute: &str) -> Option<Value> {
        self.attributes.remove(attribute)
    }

    /// All attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub(crate) fn replace_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }

    /// Slot of a relationship; `None` when not loaded.
    pub fn related(&self, relationship: &str) -> Option<&Related> {
        self.relationships.get(relationship)
    }

    /// Whether a relationship slot is loaded or assigned.
    pub fn is_loaded(&self, relationship: &str) -> bool {
        self.relationships.contains_key(relationship)
    }

    /// Assign a to-one relationship.
    pub fn set_one(&mut self, relationship: impl Into<String>, target: Option<EntityHandle>) {
        self.relationships
            .insert(relationship.into(), Related::One(target));
    }

    /// Assign a to-many relationship.
    pub fn set_many(&mut self, relationship: impl Into<String>, members: Vec<EntityHandle>) {
        self.relationships
            .insert(relationship.into(), Related::Many(members));
    }

    /// Append to a to-many relationship, materializing an empty slot.
    ///
    /// Returns false when the slot holds a to-one link or an unmaterialized
    /// lazy collection.
    pub fn add_member(&mut self, relationship: &str, member: EntityHandle) -> bool {
        match self
            .relationships
            .entry(relationship.to_string())
            .or_insert_with(|| Related::Many(Vec::new()))
        {
            Related::Many(members) => {
                members.push(member);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_related(&mut self, relationship: impl Into<String>, related: Related) {
        self.relationships.insert(relationship.into(), related);
    }

    /// Forget a relationship slot so it reads as not loaded.
    pub fn unload(&mut self, relationship: &str) -> Option<Related> {
        self.relationships.remove(relationship)
    }

    /// Drop every relationship slot, breaking reference cycles between
    /// handles.
    pub fn clear_relationships(&mut self) {
        self.relationships.clear();
    }

    /// Where the entity was last stored.
    pub fn stored_at(&self) -> Option<PartitionReference> {
        self.stored
    }

    pub(crate) fn set_stored(&mut self, stored: Option<PartitionReference>) {
        self.stored = stored;
    }
}

/// Shared, lockable reference to an [`Entity`].
#[derive(Clone)]
pub struct EntityHandle(Arc<RwLock<Entity>>);

impl EntityHandle {
    /// Wrap an entity.
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Entity> {
        self.0.read()
    }

    /// Write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, Entity> {
        self.0.write()
    }

    /// Whether two handles share one instance.
    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Entity type name.
    pub fn entity_type(&self) -> String {
        self.read().entity_type().to_string()
    }

    /// Copy of an attribute value.
    pub fn get(&self, attribute: &str) -> Option<Value> {
        self.read().get(attribute).cloned()
    }

    /// Assign an attribute.
    pub fn set(&self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.write().set(attribute, value);
    }
}

impl From<Entity> for EntityHandle {
    fn from(entity: Entity) -> Self {
        Self::new(entity)
    }
}

impl fmt::Debug for EntityHandle {
    // Relationship slots are left out so cyclic graphs print finitely.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(entity) => f
                .debug_struct("EntityHandle")
                .field("entity_type", &entity.entity_type)
                .field("attributes", &entity.attributes)
                .field("stored", &entity.stored)
                .finish_non_exhaustive(),
            None => f.write_str("EntityHandle(<locked>)"),
        }
    }
}
