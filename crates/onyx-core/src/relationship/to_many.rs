//! To-many relationship controller.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{sort_by_natural_order, CascadeContext, LazyCollection, Link};
use crate::catalog::FetchPolicy;
use crate::entity::{EntityHandle, Related};
use crate::error::Error;
use crate::persist::Persister;
use crate::reference::{Identifier, RelationshipReference};

/// Controller for a relationship storing a set of related keys per owner.
pub struct ToManyController {
    link: Link,
}

impl ToManyController {
    pub(crate) fn new(link: Link) -> Self {
        Self { link }
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }

    /// Persist the owner's collection.
    ///
    /// Members are saved when the policy cascades saves, otherwise linked by
    /// key. Members dropped from the collection are unlinked and, when the
    /// policy cascades deletes, deleted. The stored set ends up equal to the
    /// surviving members.
    pub fn save(
        &self,
        persister: &Persister<'_>,
        owner: &EntityHandle,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let link = &self.link;
        let name = &link.def.name;
        let slot = owner.read().related(name).cloned();
        let members = match slot {
            None => return Ok(()),
            Some(Related::Many(members)) => members,
            Some(Related::Lazy(lazy)) => match lazy.loaded() {
                Some(members) => members,
                // an untouched lazy view leaves the stored set as is
                None => return Ok(()),
            },
            Some(Related::One(_)) => {
                return Err(Error::InvalidData(format!(
                    "relationship '{}' holds a collection",
                    name
                )))
            }
        };

        let mut desired = BTreeSet::new();
        for member in &members {
            let key = if link.def.cascade.saves() {
                persister.save(member, cascade)?
            } else {
                match persister.relationship_reference(member)? {
                    Some(key) => key,
                    None => {
                        warn!(relationship = %name, owner = %owner_key, "member has no identifier; not linked");
                        continue;
                    }
                }
            };
            desired.insert(key);
        }

        let ctx = persister.context();
        let stored = link.forward.replace(ctx, owner_key, desired.clone())?;

        let removed: Vec<&RelationshipReference> = stored.difference(&desired).collect();
        let added: Vec<&RelationshipReference> = desired.difference(&stored).collect();
        debug!(
            relationship = %name,
            owner = %owner_key,
            added = added.len(),
            removed = removed.len(),
            "to-many edge saved"
        );

        for member in &removed {
            link.unlink_inverse(ctx, member, owner_key)?;
        }
        for member in &added {
            link.link_inverse(ctx, member, owner_key)?;
        }
        if link.def.cascade.deletes() {
            for member in removed {
                persister.delete_key(link.target_name(), member, cascade)?;
            }
        }
        Ok(())
    }

    /// Remove the owner's edge set and each member's back-reference; cascade
    /// to the members when the policy deletes.
    pub fn delete(
        &self,
        persister: &Persister<'_>,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let link = &self.link;
        let ctx = persister.context();
        let stored = link.forward.take(ctx, owner_key)?;
        for member in &stored {
            link.unlink_inverse(ctx, member, owner_key)?;
        }
        if link.def.cascade.deletes() {
            for member in &stored {
                persister.delete_key(link.target_name(), member, cascade)?;
            }
        }
        Ok(())
    }

    /// Load the owner's collection.
    ///
    /// A lazy relationship gets a [`LazyCollection`] over the stored keys
    /// unless the cascade forces eager loading; otherwise every member is
    /// resolved now and sorted by the target's natural ordering.
    pub fn hydrate(
        &self,
        persister: &Persister<'_>,
        owner: &EntityHandle,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let link = &self.link;
        let generator = link.target.generator;
        let keys: Vec<RelationshipReference> = link
            .forward
            .members(owner_key)?
            .into_iter()
            .filter(|k| Identifier::from_value(Some(&k.identifier), generator).is_assigned())
            .collect();

        let related = if link.def.fetch == FetchPolicy::Lazy && !cascade.force_eager() {
            Related::Lazy(LazyCollection::new(
                Arc::clone(persister.context()),
                link.target_name(),
                keys,
            ))
        } else {
            let mut members = Vec::with_capacity(keys.len());
            for key in &keys {
                let handle = persister
                    .load(link.target_name(), key, cascade)?
                    .ok_or_else(|| Error::dangling(link.target_name(), key))?;
                members.push(handle);
            }
            Related::Many(sort_by_natural_order(&link.target, members))
        };

        owner.write().set_related(link.def.name.clone(), related);
        Ok(())
    }
}
