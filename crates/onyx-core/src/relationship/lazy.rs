//! Lazily materialized to-many collections.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{sort_by_natural_order, CascadeContext};
use crate::context::SchemaContext;
use crate::entity::EntityHandle;
use crate::error::Error;
use crate::persist::Persister;
use crate::reference::RelationshipReference;

/// View over the stored keys of a to-many relationship.
///
/// The size comes from the stored keys without touching the members.
/// Members are resolved on the first call to [`LazyCollection::load`];
/// clones share the loaded members.
#[derive(Clone)]
pub struct LazyCollection {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    ctx: Arc<SchemaContext>,
    target: String,
    references: Vec<RelationshipReference>,
    loaded: Mutex<Option<Vec<EntityHandle>>>,
}

impl LazyCollection {
    pub(crate) fn new(
        ctx: Arc<SchemaContext>,
        target: impl Into<String>,
        references: Vec<RelationshipReference>,
    ) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                ctx,
                target: target.into(),
                references,
                loaded: Mutex::new(None),
            }),
        }
    }

    /// Entity type of the members.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// Number of linked members.
    pub fn len(&self) -> usize {
        self.inner.references.len()
    }

    /// Whether no member is linked.
    pub fn is_empty(&self) -> bool {
        self.inner.references.is_empty()
    }

    /// Keys of the linked members.
    pub fn references(&self) -> &[RelationshipReference] {
        &self.inner.references
    }

    /// Whether the members were resolved.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.lock().is_some()
    }

    /// Resolved members, if already loaded.
    pub fn loaded(&self) -> Option<Vec<EntityHandle>> {
        self.inner.loaded.lock().clone()
    }

    /// Resolve every member, once.
    ///
    /// A member whose record no longer exists fails with
    /// `RelationshipHydration`.
    pub fn load(&self) -> Result<Vec<EntityHandle>, Error> {
        let mut loaded = self.inner.loaded.lock();
        if let Some(members) = loaded.as_ref() {
            return Ok(members.clone());
        }

        let ctx = &self.inner.ctx;
        let persister = Persister::new(ctx);
        let mut cascade = CascadeContext::new(ctx.config().max_cascade_depth);
        let mut members = Vec::with_capacity(self.inner.references.len());
        for key in &self.inner.references {
            let handle = persister
                .load(&self.inner.target, key, &mut cascade)?
                .ok_or_else(|| Error::dangling(&self.inner.target, key))?;
            members.push(handle);
        }

        let def = ctx.catalog().entity(&self.inner.target)?;
        let members = sort_by_natural_order(&def, members);
        trace!(entity = %self.inner.target, members = members.len(), "lazy collection loaded");
        *loaded = Some(members.clone());
        Ok(members)
    }

    /// Member at a position, loading the collection if needed.
    pub fn get(&self, index: usize) -> Result<Option<EntityHandle>, Error> {
        Ok(self.load()?.get(index).cloned())
    }
}

impl fmt::Debug for LazyCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCollection")
            .field("target", &self.inner.target)
            .field("len", &self.len())
            .field("loaded", &self.inner.loaded.try_lock().map(|l| l.is_some()))
            .finish()
    }
}
