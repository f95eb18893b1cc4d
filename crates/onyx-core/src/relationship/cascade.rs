//! Per-operation cascade state.

use std::collections::HashMap;

use crate::entity::EntityHandle;
use crate::error::Error;
use crate::reference::RelationshipReference;

/// Identity of a record within one cascade: entity type plus logical key.
pub type EntityKey = (String, RelationshipReference);

/// Visited set threaded through one top-level save, delete or hydrate.
///
/// A record already in the set is never saved, deleted or hydrated again in
/// the same operation. Hydration also uses the stored handle to hand out one
/// instance per record.
#[derive(Debug)]
pub struct CascadeContext {
    visited: HashMap<EntityKey, EntityHandle>,
    depth: usize,
    max_depth: usize,
    force_eager: bool,
}

impl CascadeContext {
    /// Create an empty context with a recursion limit.
    pub fn new(max_depth: usize) -> Self {
        Self {
            visited: HashMap::new(),
            depth: 0,
            max_depth,
            force_eager: false,
        }
    }

    /// Create a context that materializes lazy relationships immediately.
    pub fn eager(max_depth: usize) -> Self {
        Self {
            force_eager: true,
            ..Self::new(max_depth)
        }
    }

    /// Whether lazy fetch policies are overridden.
    pub fn force_eager(&self) -> bool {
        self.force_eager
    }

    /// Whether a record was already processed.
    pub fn is_visited(&self, entity: &str, key: &RelationshipReference) -> bool {
        self.visited.contains_key(&(entity.to_string(), key.clone()))
    }

    /// Instance recorded for a processed record.
    pub fn visited(&self, entity: &str, key: &RelationshipReference) -> Option<&EntityHandle> {
        self.visited.get(&(entity.to_string(), key.clone()))
    }

    /// Record a processed record.
    pub fn visit(&mut self, entity: &str, key: RelationshipReference, handle: EntityHandle) {
        self.visited.insert((entity.to_string(), key), handle);
    }

    /// Number of processed records.
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    /// Whether nothing was processed yet.
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) -> Result<(), Error> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Error::CascadeDepthExceeded { depth: self.depth });
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::partition::Partition;
    use onyx_proto::Value;

    #[test]
    fn test_visited_set() {
        let mut cascade = CascadeContext::new(10);
        let key = RelationshipReference::new(Value::Int64(1), Partition::None);
        let handle = EntityHandle::new(Entity::new("Node"));

        assert!(!cascade.is_visited("Node", &key));
        cascade.visit("Node", key.clone(), handle.clone());
        assert!(cascade.is_visited("Node", &key));
        assert!(!cascade.is_visited("Other", &key));
        assert!(cascade.visited("Node", &key).unwrap().ptr_eq(&handle));

        // Int32 and Int64 identifiers are the same key
        let narrow = RelationshipReference::new(Value::Int32(1), Partition::None);
        assert!(cascade.is_visited("Node", &narrow));
        assert_eq!(cascade.len(), 1);
    }

    #[test]
    fn test_depth_limit() {
        let mut cascade = CascadeContext::new(2);
        cascade.enter().unwrap();
        cascade.enter().unwrap();
        assert!(matches!(
            cascade.enter(),
            Err(Error::CascadeDepthExceeded { depth: 3 })
        ));
        cascade.leave();
        cascade.leave();
        cascade.leave();
        cascade.leave();
        assert_eq!(cascade.depth(), 0);
        assert!(!cascade.force_eager());
        assert!(CascadeContext::eager(2).force_eager());
    }
}
