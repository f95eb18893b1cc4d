//! Relationship controllers.
//!
//! A controller owns the edge store of one relationship and keeps its inverse
//! in step. [`RelationshipController::ToOne`] stores a single related key per
//! owner; [`RelationshipController::ToMany`] stores a set. Both save, delete
//! and hydrate edges inside a [`CascadeContext`] so that cyclic graphs are
//! processed once per record.

mod cascade;
mod lazy;
mod to_many;
mod to_one;

pub use cascade::{CascadeContext, EntityKey};
pub use lazy::LazyCollection;
pub use to_many::ToManyController;
pub use to_one::ToOneController;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::catalog::{EntityDef, OrderDirection, RelationshipDef};
use crate::context::SchemaContext;
use crate::entity::EntityHandle;
use crate::error::Error;
use crate::persist::Persister;
use crate::reference::RelationshipReference;
use crate::storage::{RelationshipStore, StoredEdge};
use onyx_proto::Value;

/// Controller for one relationship of one entity type.
pub enum RelationshipController {
    /// One-to-one and many-to-one relationships.
    ToOne(ToOneController),
    /// One-to-many and many-to-many relationships.
    ToMany(ToManyController),
}

impl RelationshipController {
    /// Controller for a relationship declared on `entity`.
    pub fn new(ctx: &SchemaContext, entity: &str, def: &RelationshipDef) -> Result<Self, Error> {
        let link = Link::open(ctx, entity, def)?;
        Ok(if def.is_to_many() {
            RelationshipController::ToMany(ToManyController::new(link))
        } else {
            RelationshipController::ToOne(ToOneController::new(link))
        })
    }

    fn link(&self) -> &Link {
        match self {
            RelationshipController::ToOne(c) => c.link(),
            RelationshipController::ToMany(c) => c.link(),
        }
    }

    /// Relationship definition.
    pub fn def(&self) -> &RelationshipDef {
        &self.link().def
    }

    /// Persist the owner's in-memory slot.
    ///
    /// An unloaded slot leaves the stored edges untouched.
    pub fn save(
        &self,
        persister: &Persister<'_>,
        owner: &EntityHandle,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        match self {
            RelationshipController::ToOne(c) => c.save(persister, owner, owner_key, cascade),
            RelationshipController::ToMany(c) => c.save(persister, owner, owner_key, cascade),
        }
    }

    /// Drop the owner's edges, cascading when the policy deletes.
    pub fn delete(
        &self,
        persister: &Persister<'_>,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        match self {
            RelationshipController::ToOne(c) => c.delete(persister, owner_key, cascade),
            RelationshipController::ToMany(c) => c.delete(persister, owner_key, cascade),
        }
    }

    /// Load the owner's slot from storage.
    pub fn hydrate(
        &self,
        persister: &Persister<'_>,
        owner: &EntityHandle,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        match self {
            RelationshipController::ToOne(c) => c.hydrate(persister, owner, owner_key, cascade),
            RelationshipController::ToMany(c) => c.hydrate(persister, owner, owner_key, cascade),
        }
    }

    /// Keys of the records linked from an owner.
    pub fn relationship_identifiers_with_reference(
        &self,
        owner_key: &RelationshipReference,
    ) -> Result<BTreeSet<RelationshipReference>, Error> {
        self.link().forward.members(owner_key)
    }

    /// Every owner holding an edge of this relationship.
    pub fn owners(&self) -> Result<Vec<RelationshipReference>, Error> {
        self.link().forward.store.owners()
    }

    /// Move the owner's edges to a new key after the owner was relocated.
    pub fn relocate(
        &self,
        ctx: &SchemaContext,
        old_key: &RelationshipReference,
        new_key: &RelationshipReference,
    ) -> Result<(), Error> {
        self.link().relocate(ctx, old_key, new_key)
    }
}

/// One direction of a relationship: the edge store of (entity, relationship).
#[derive(Clone)]
pub(crate) struct EdgeSide {
    entity: String,
    relationship: String,
    to_many: bool,
    store: Arc<dyn RelationshipStore>,
}

impl EdgeSide {
    fn open(ctx: &SchemaContext, entity: &str, def: &RelationshipDef) -> Result<Self, Error> {
        Ok(Self {
            entity: entity.to_string(),
            relationship: def.name.clone(),
            to_many: def.is_to_many(),
            store: ctx.partitions().relationship_store(entity, &def.name)?,
        })
    }

    pub(crate) fn members(&self, owner: &RelationshipReference) -> Result<BTreeSet<RelationshipReference>, Error> {
        self.store.get_many(owner)
    }

    pub(crate) fn one(&self, owner: &RelationshipReference) -> Result<Option<RelationshipReference>, Error> {
        self.store.get_one(owner)
    }

    /// Replace a to-one edge, returning the previous target.
    pub(crate) fn set_one(
        &self,
        owner: &RelationshipReference,
        target: Option<&RelationshipReference>,
    ) -> Result<Option<RelationshipReference>, Error> {
        let edge = target.map(|t| StoredEdge::One(t.clone()));
        Ok(self
            .store
            .replace(owner, edge.as_ref())?
            .and_then(StoredEdge::into_one))
    }

    /// Replace a to-many edge set under the edge lock, returning the previous set.
    pub(crate) fn replace(
        &self,
        ctx: &SchemaContext,
        owner: &RelationshipReference,
        members: BTreeSet<RelationshipReference>,
    ) -> Result<BTreeSet<RelationshipReference>, Error> {
        let lock = ctx.edge_lock(&self.entity, &self.relationship);
        let _guard = lock.lock();
        let previous = self.store.get_many(owner)?;
        self.store.put_many(owner, members)?;
        Ok(previous)
    }

    /// Remove every edge of an owner, returning the previous members.
    pub(crate) fn take(
        &self,
        ctx: &SchemaContext,
        owner: &RelationshipReference,
    ) -> Result<BTreeSet<RelationshipReference>, Error> {
        if !self.to_many {
            return Ok(self.store.replace(owner, None)?.map(StoredEdge::into_set).unwrap_or_default());
        }
        let lock = ctx.edge_lock(&self.entity, &self.relationship);
        let _guard = lock.lock();
        Ok(self.store.remove(owner)?.map(StoredEdge::into_set).unwrap_or_default())
    }

    /// Link `member` from `owner`.
    ///
    /// A to-one side is overwritten and the displaced target returned. A
    /// to-many side appends, converting a stored single value into a set.
    pub(crate) fn add(
        &self,
        ctx: &SchemaContext,
        owner: &RelationshipReference,
        member: &RelationshipReference,
    ) -> Result<Option<RelationshipReference>, Error> {
        if !self.to_many {
            return self.set_one(owner, Some(member));
        }
        let lock = ctx.edge_lock(&self.entity, &self.relationship);
        let _guard = lock.lock();
        let mut members = self.store.get_many(owner)?;
        if members.insert(member.clone()) || matches!(self.store.get(owner)?, Some(StoredEdge::One(_))) {
            self.store.put_many(owner, members)?;
        }
        Ok(None)
    }

    /// Unlink `member` from `owner` if it is linked.
    pub(crate) fn remove(
        &self,
        ctx: &SchemaContext,
        owner: &RelationshipReference,
        member: &RelationshipReference,
    ) -> Result<bool, Error> {
        if !self.to_many {
            if self.store.get_one(owner)?.as_ref() == Some(member) {
                self.store.remove(owner)?;
                return Ok(true);
            }
            return Ok(false);
        }
        let lock = ctx.edge_lock(&self.entity, &self.relationship);
        let _guard = lock.lock();
        let mut members = self.store.get_many(owner)?;
        if members.remove(member) {
            self.store.put_many(owner, members)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Forward and inverse sides of a relationship plus its target definition.
pub(crate) struct Link {
    pub(crate) def: RelationshipDef,
    pub(crate) target: Arc<EntityDef>,
    pub(crate) forward: EdgeSide,
    pub(crate) inverse: Option<EdgeSide>,
}

impl Link {
    fn open(ctx: &SchemaContext, entity: &str, def: &RelationshipDef) -> Result<Self, Error> {
        let target = ctx.catalog().entity(&def.target)?;
        let forward = EdgeSide::open(ctx, entity, def)?;
        let inverse = match &def.inverse {
            Some(name) => {
                let inverse_def = target.get_relationship(name).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "inverse '{}' of {}.{} is not declared on {}",
                        name, entity, def.name, def.target
                    ))
                })?;
                Some(EdgeSide::open(ctx, &def.target, inverse_def)?)
            }
            None => None,
        };
        Ok(Self {
            def: def.clone(),
            target,
            forward,
            inverse,
        })
    }

    pub(crate) fn target_name(&self) -> &str {
        &self.target.name
    }

    /// Record `owner` on the inverse side of `member`.
    ///
    /// When a to-one inverse pointed at another owner, that owner's forward
    /// edge to `member` is dropped.
    pub(crate) fn link_inverse(
        &self,
        ctx: &SchemaContext,
        member: &RelationshipReference,
        owner: &RelationshipReference,
    ) -> Result<(), Error> {
        let Some(inverse) = &self.inverse else {
            return Ok(());
        };
        if let Some(displaced) = inverse.add(ctx, member, owner)? {
            if &displaced != owner {
                self.forward.remove(ctx, &displaced, member)?;
            }
        }
        Ok(())
    }

    /// Remove `owner` from the inverse side of `member`.
    pub(crate) fn unlink_inverse(
        &self,
        ctx: &SchemaContext,
        member: &RelationshipReference,
        owner: &RelationshipReference,
    ) -> Result<(), Error> {
        if let Some(inverse) = &self.inverse {
            inverse.remove(ctx, member, owner)?;
        }
        Ok(())
    }

    fn relocate(
        &self,
        ctx: &SchemaContext,
        old_key: &RelationshipReference,
        new_key: &RelationshipReference,
    ) -> Result<(), Error> {
        let members = self.forward.take(ctx, old_key)?;
        if members.is_empty() {
            return Ok(());
        }
        if self.forward.to_many {
            self.forward.replace(ctx, new_key, members.clone())?;
        } else {
            self.forward.set_one(new_key, members.first())?;
        }
        for member in &members {
            self.unlink_inverse(ctx, member, old_key)?;
            self.link_inverse(ctx, member, new_key)?;
        }
        Ok(())
    }
}

/// Sort members by the target's natural ordering, if it declares one.
pub(crate) fn sort_by_natural_order(target: &EntityDef, members: Vec<EntityHandle>) -> Vec<EntityHandle> {
    let order = &target.lifecycle.default_order;
    if order.is_empty() || members.len() < 2 {
        return members;
    }

    let mut keyed: Vec<(Vec<Value>, EntityHandle)> = members
        .into_iter()
        .map(|handle| {
            let values = {
                let entity = handle.read();
                order
                    .iter()
                    .map(|o| entity.get(&o.field).cloned().unwrap_or(Value::Null))
                    .collect()
            };
            (values, handle)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, o) in order.iter().enumerate() {
            let ord = a[i].total_cmp(&b[i]);
            let ord = match o.direction {
                OrderDirection::Asc => ord,
                OrderDirection::Desc => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });

    keyed.into_iter().map(|(_, handle)| handle).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, FieldType, OrderBy, ScalarType};
    use crate::entity::Entity;

    #[test]
    fn test_sort_by_natural_order() {
        let def = EntityDef::new("Child", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
            .with_field(FieldDef::optional("rank", FieldType::scalar(ScalarType::Int32)))
            .with_default_order(OrderBy::desc("rank"));

        let members: Vec<EntityHandle> = [(1i64, Some(3)), (2, None), (3, Some(7))]
            .into_iter()
            .map(|(id, rank)| EntityHandle::new(Entity::new("Child").with("id", id).with("rank", rank)))
            .collect();

        let sorted = sort_by_natural_order(&def, members);
        let ids: Vec<Value> = sorted.iter().map(|h| h.get("id").unwrap()).collect();
        assert_eq!(ids, vec![Value::Int64(3), Value::Int64(1), Value::Int64(2)]);
    }

    #[test]
    fn test_sort_without_order_keeps_members() {
        let def = EntityDef::new("Child", "id");
        let members = vec![
            EntityHandle::new(Entity::new("Child").with("id", 2i64)),
            EntityHandle::new(Entity::new("Child").with("id", 1i64)),
        ];
        let sorted = sort_by_natural_order(&def, members.clone());
        assert!(sorted[0].ptr_eq(&members[0]));
    }
}
