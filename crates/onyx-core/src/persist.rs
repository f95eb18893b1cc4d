//! Record persistence with relationship cascades.
//!
//! [`Persister`] writes, removes and loads single records, keeps their
//! secondary indexes in step and drives the relationship controllers for
//! every relationship of the record. All recursion goes through one
//! [`CascadeContext`] per top-level call.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::catalog::{EntityDescriptor, IdentifierGenerator};
use crate::context::SchemaContext;
use crate::entity::{Entity, EntityHandle};
use crate::error::Error;
use crate::partition::Partition;
use crate::reference::{Identifier, PartitionReference, Reference, RelationshipReference};
use crate::relationship::{CascadeContext, RelationshipController};
use crate::storage::Attributes;
use onyx_proto::Value;

/// Saves, deletes and loads records of any entity type.
pub struct Persister<'a> {
    ctx: &'a Arc<SchemaContext>,
}

impl<'a> Persister<'a> {
    /// Create a persister over a schema context.
    pub fn new(ctx: &'a Arc<SchemaContext>) -> Self {
        Self { ctx }
    }

    /// The schema context.
    pub fn context(&self) -> &'a Arc<SchemaContext> {
        self.ctx
    }

    /// Logical key of an in-memory entity, or `None` while its identifier is
    /// unassigned.
    ///
    /// A stored entity keys by the partition it was stored in; an unsaved one
    /// by the partition its attributes select.
    pub fn relationship_reference(&self, handle: &EntityHandle) -> Result<Option<RelationshipReference>, Error> {
        let (entity_type, attributes, stored) = snapshot(handle);
        let descriptor = self.ctx.partitions().descriptor(&entity_type, Partition::None)?;
        let identifier = match Identifier::from_value(
            attributes.get(descriptor.identifier_field()),
            descriptor.generator(),
        ) {
            Identifier::Value(v) => coerce_attribute(&descriptor, descriptor.identifier_field(), &v)?,
            Identifier::Unassigned => return Ok(None),
        };
        let partition = match stored {
            Some(at) => at.partition(),
            None => self.ctx.partitions().partition_of(&descriptor, &attributes)?,
        };
        Ok(Some(RelationshipReference::new(identifier, partition)))
    }

    /// Save an entity and, per cascade policy, its relationships.
    ///
    /// Assigns a sequence identifier when needed, validates and coerces the
    /// attributes, relocates the record when its partition changed and
    /// maintains secondary indexes. An entity already visited by this
    /// cascade returns its key without being written again.
    pub fn save(&self, handle: &EntityHandle, cascade: &mut CascadeContext) -> Result<RelationshipReference, Error> {
        let (entity_type, attributes, stored) = snapshot(handle);
        let partitions = self.ctx.partitions();
        let base = partitions.descriptor(&entity_type, Partition::None)?;

        let identifier = self.identifier_for_save(&base, &attributes)?;
        let mut attributes = prepare_attributes(&base, &attributes)?;
        attributes.insert(base.identifier_field().to_string(), identifier.clone());

        let partition = partitions.partition_of(&base, &attributes)?;
        let key = RelationshipReference::new(identifier.clone(), partition);
        if cascade.is_visited(&entity_type, &key) {
            return Ok(key);
        }
        cascade.enter()?;

        // a partition change moves the record; its old slot and index entries go
        let relocated = match stored {
            Some(old) if old.partition() != partition => {
                let old_descriptor = partitions.descriptor(&entity_type, old.partition())?;
                self.remove_index_entries(&old_descriptor, old.reference)?;
                partitions.record_store(&old_descriptor)?.delete(&identifier)?;
                Some(RelationshipReference::new(identifier.clone(), old.partition()))
            }
            _ => None,
        };

        let descriptor = partitions.descriptor(&entity_type, partition)?;
        let store = partitions.record_store(&descriptor)?;
        let previous_reference = store.reference_for(&identifier)?;
        let previous = match previous_reference {
            Some(r) => store.get(r)?,
            None => None,
        };
        let reference = store.save(&identifier, &attributes)?;

        for field in descriptor.indexes() {
            let value = attributes.get(&field.name).cloned().unwrap_or(Value::Null);
            let unchanged = previous
                .as_ref()
                .is_some_and(|p| p.get(&field.name).unwrap_or(&Value::Null) == &value);
            if !unchanged {
                partitions
                    .index_store(&descriptor, &field.name)?
                    .insert(&value, previous_reference, reference)?;
            }
        }

        {
            let mut entity = handle.write();
            entity.replace_attributes(attributes);
            entity.set_stored(Some(PartitionReference::new(partition, reference)));
        }
        cascade.visit(&entity_type, key.clone(), handle.clone());
        trace!(entity = %entity_type, key = %key, reference, "entity saved");

        for relationship in descriptor.relationships() {
            let controller = RelationshipController::new(self.ctx, &entity_type, relationship)?;
            if let Some(old_key) = &relocated {
                controller.relocate(self.ctx, old_key, &key)?;
            }
            if relationship.cascade.is_deferred() {
                continue;
            }
            controller.save(self, handle, &key, cascade)?;
        }

        cascade.leave();
        Ok(key)
    }

    /// Save one relationship of a stored entity, including deferred ones.
    pub fn save_relationship(
        &self,
        handle: &EntityHandle,
        relationship: &str,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let entity_type = handle.entity_type();
        let descriptor = self.ctx.partitions().descriptor(&entity_type, Partition::None)?;
        let def = descriptor.require_relationship(relationship)?;
        let key = self
            .relationship_reference(handle)?
            .ok_or_else(|| Error::InvalidConstructor(format!("{} has no identifier", entity_type)))?;
        cascade.visit(&entity_type, key.clone(), handle.clone());
        RelationshipController::new(self.ctx, &entity_type, def)?.save(self, handle, &key, cascade)
    }

    /// Delete an entity, cascading per policy. Returns whether a record was
    /// removed.
    pub fn delete(&self, handle: &EntityHandle, cascade: &mut CascadeContext) -> Result<bool, Error> {
        let Some(key) = self.relationship_reference(handle)? else {
            return Ok(false);
        };
        let entity_type = handle.entity_type();
        let deleted = self.delete_key(&entity_type, &key, cascade)?;
        if deleted {
            handle.write().set_stored(None);
        }
        Ok(deleted)
    }

    /// Delete a record by logical key, cascading per policy.
    ///
    /// Index entries and relationship edges go first, then the record. A key
    /// already visited by this cascade is left alone.
    pub fn delete_key(
        &self,
        entity_type: &str,
        key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<bool, Error> {
        if cascade.is_visited(entity_type, key) {
            return Ok(false);
        }
        let partitions = self.ctx.partitions();
        let descriptor = partitions.descriptor(entity_type, key.partition())?;
        let store = partitions.record_store(&descriptor)?;
        let Some(reference) = store.reference_for(&key.identifier)? else {
            return Ok(false);
        };
        let attributes = store.get(reference)?.unwrap_or_default();
        let at = PartitionReference::new(key.partition(), reference);
        cascade.visit(
            entity_type,
            key.clone(),
            EntityHandle::new(Entity::from_record(entity_type, attributes, at)),
        );
        cascade.enter()?;

        self.remove_index_entries(&descriptor, reference)?;
        for relationship in descriptor.relationships() {
            RelationshipController::new(self.ctx, entity_type, relationship)?
                .delete(self, key, cascade)?;
        }
        store.delete(&key.identifier)?;

        cascade.leave();
        debug!(entity = entity_type, key = %key, "entity deleted");
        Ok(true)
    }

    /// Load a record by logical key and hydrate its relationships.
    pub fn load(
        &self,
        entity_type: &str,
        key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<Option<EntityHandle>, Error> {
        if let Some(handle) = cascade.visited(entity_type, key) {
            return Ok(Some(handle.clone()));
        }
        let partitions = self.ctx.partitions();
        let descriptor = partitions.descriptor(entity_type, key.partition())?;
        match partitions.record_store(&descriptor)?.reference_for(&key.identifier)? {
            Some(reference) => self.load_reference(
                entity_type,
                PartitionReference::new(key.partition(), reference),
                cascade,
            ),
            None => Ok(None),
        }
    }

    /// Load a record by physical reference and hydrate its relationships.
    ///
    /// A record hydrated earlier in the same cascade is returned as the same
    /// instance.
    pub fn load_reference(
        &self,
        entity_type: &str,
        at: PartitionReference,
        cascade: &mut CascadeContext,
    ) -> Result<Option<EntityHandle>, Error> {
        let partitions = self.ctx.partitions();
        let descriptor = partitions.descriptor(entity_type, at.partition())?;
        let Some(attributes) = partitions.record_store(&descriptor)?.get(at.reference)? else {
            return Ok(None);
        };
        let identifier = attributes
            .get(descriptor.identifier_field())
            .cloned()
            .unwrap_or(Value::Null);
        let key = RelationshipReference::new(identifier, at.partition());
        if let Some(handle) = cascade.visited(entity_type, &key) {
            return Ok(Some(handle.clone()));
        }

        let handle = EntityHandle::new(Entity::from_record(entity_type, attributes, at));
        cascade.visit(entity_type, key.clone(), handle.clone());
        cascade.enter()?;
        for relationship in descriptor.relationships() {
            RelationshipController::new(self.ctx, entity_type, relationship)?
                .hydrate(self, &handle, &key, cascade)?;
        }
        cascade.leave();
        Ok(Some(handle))
    }

    /// Hydrate one relationship slot of an entity.
    pub fn hydrate_relationship(
        &self,
        handle: &EntityHandle,
        relationship: &str,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let entity_type = handle.entity_type();
        let descriptor = self.ctx.partitions().descriptor(&entity_type, Partition::None)?;
        let def = descriptor.require_relationship(relationship)?;
        let key = self
            .relationship_reference(handle)?
            .ok_or_else(|| Error::InvalidConstructor(format!("{} has no identifier", entity_type)))?;
        cascade.visit(&entity_type, key.clone(), handle.clone());
        RelationshipController::new(self.ctx, &entity_type, def)?.hydrate(self, handle, &key, cascade)
    }

    /// Drop every index entry of a record.
    pub(crate) fn remove_index_entries(&self, descriptor: &EntityDescriptor, reference: Reference) -> Result<(), Error> {
        for field in descriptor.indexes() {
            self.ctx
                .partitions()
                .index_store(descriptor, &field.name)?
                .delete(reference)?;
        }
        Ok(())
    }

    fn identifier_for_save(&self, descriptor: &EntityDescriptor, attributes: &Attributes) -> Result<Value, Error> {
        let field = descriptor.identifier_field();
        match Identifier::from_value(attributes.get(field), descriptor.generator()) {
            Identifier::Value(v) => coerce_attribute(descriptor, field, &v),
            Identifier::Unassigned if descriptor.generator() == IdentifierGenerator::Sequence => {
                let next = self.ctx.engine().next_sequence(descriptor.name())?;
                coerce_attribute(descriptor, field, &Value::Int64(next))
            }
            Identifier::Unassigned => Err(Error::AttributeTypeMismatch {
                entity: descriptor.name().to_string(),
                attribute: field.to_string(),
                expected: "an identifier".into(),
                found: "null".into(),
            }),
        }
    }
}

fn snapshot(handle: &EntityHandle) -> (String, Attributes, Option<PartitionReference>) {
    let entity = handle.read();
    (
        entity.entity_type().to_string(),
        entity.attributes().clone(),
        entity.stored_at(),
    )
}

/// Coerce one attribute value to its declared type.
pub(crate) fn coerce_attribute(descriptor: &EntityDescriptor, attribute: &str, value: &Value) -> Result<Value, Error> {
    let field = descriptor.require_attribute(attribute)?;
    field
        .field_type
        .coerce(value)
        .ok_or_else(|| Error::AttributeTypeMismatch {
            entity: descriptor.name().to_string(),
            attribute: attribute.to_string(),
            expected: field.field_type.describe(),
            found: value.type_name().to_string(),
        })
}

/// Validate and coerce a full attribute map.
///
/// Every attribute must be declared; required attributes other than the
/// identifier must be present. The identifier is left out.
fn prepare_attributes(descriptor: &EntityDescriptor, attributes: &Attributes) -> Result<Attributes, Error> {
    let mut prepared = Attributes::new();
    for (name, value) in attributes {
        if descriptor.is_identifier(name) {
            continue;
        }
        prepared.insert(name.clone(), coerce_attribute(descriptor, name, value)?);
    }
    for field in descriptor.attributes() {
        if !field.field_type.is_nullable()
            && !descriptor.is_identifier(&field.name)
            && !prepared.contains_key(&field.name)
        {
            return Err(Error::AttributeTypeMismatch {
                entity: descriptor.name().to_string(),
                attribute: field.name.clone(),
                expected: field.field_type.describe(),
                found: "null".into(),
            });
        }
    }
    Ok(prepared)
}
