//! To-one relationship controller.

use tracing::{trace, warn};

use super::{CascadeContext, Link};
use crate::entity::{EntityHandle, Related};
use crate::error::Error;
use crate::persist::Persister;
use crate::reference::{Identifier, RelationshipReference};

/// Controller for a relationship storing one related key per owner.
pub struct ToOneController {
    link: Link,
}

impl ToOneController {
    pub(crate) fn new(link: Link) -> Self {
        Self { link }
    }

    pub(crate) fn link(&self) -> &Link {
        &self.link
    }

    /// Persist the owner's to-one slot.
    ///
    /// The related record is saved first when the policy cascades saves. A
    /// replaced target is unlinked from the inverse and, when the policy
    /// cascades deletes, deleted unless this operation already visited it.
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
        let target = match slot {
            None => return Ok(()),
            Some(Related::One(target)) => target,
            Some(_) => {
                return Err(Error::InvalidData(format!(
                    "relationship '{}' holds a single record",
                    name
                )))
            }
        };

        let new_key = match &target {
            None => None,
            Some(handle) if link.def.cascade.saves() => Some(persister.save(handle, cascade)?),
            Some(handle) => match persister.relationship_reference(handle)? {
                Some(key) => Some(key),
                None => {
                    warn!(relationship = %name, owner = %owner_key, "related record has no identifier; edge left unchanged");
                    return Ok(());
                }
            },
        };

        let ctx = persister.context();
        let previous = link.forward.set_one(owner_key, new_key.as_ref())?;
        if previous == new_key {
            if let Some(key) = &new_key {
                link.link_inverse(ctx, key, owner_key)?;
            }
            return Ok(());
        }
        trace!(relationship = %name, owner = %owner_key, "to-one edge replaced");

        if let Some(old) = &previous {
            link.unlink_inverse(ctx, old, owner_key)?;
            if link.def.cascade.deletes() {
                persister.delete_key(link.target_name(), old, cascade)?;
            }
        }
        if let Some(key) = &new_key {
            link.link_inverse(ctx, key, owner_key)?;
        }
        Ok(())
    }

    /// Remove the owner's edge and its inverse; cascade to the target when
    /// the policy deletes.
    pub fn delete(
        &self,
        persister: &Persister<'_>,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let link = &self.link;
        let ctx = persister.context();
        let previous = link.forward.set_one(owner_key, None)?;
        if let Some(old) = previous {
            link.unlink_inverse(ctx, &old, owner_key)?;
            if link.def.cascade.deletes() {
                persister.delete_key(link.target_name(), &old, cascade)?;
            }
        }
        Ok(())
    }

    /// Resolve the stored target onto the owner.
    ///
    /// An unassigned sequence identifier reads as no target; a target whose
    /// record is gone is a hydration error.
    pub fn hydrate(
        &self,
        persister: &Persister<'_>,
        owner: &EntityHandle,
        owner_key: &RelationshipReference,
        cascade: &mut CascadeContext,
    ) -> Result<(), Error> {
        let link = &self.link;
        let related = match link.forward.one(owner_key)? {
            None => None,
            Some(key) => {
                let identifier = Identifier::from_value(Some(&key.identifier), link.target.generator);
                if identifier.is_assigned() {
                    let handle = persister
                        .load(link.target_name(), &key, cascade)?
                        .ok_or_else(|| Error::dangling(link.target_name(), &key))?;
                    Some(handle)
                } else {
                    None
                }
            }
        };
        owner
            .write()
            .set_related(link.def.name.clone(), Related::One(related));
        Ok(())
    }
}
