//! Entity manager: the persistence facade over one open database.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::catalog::SchemaBundle;
use crate::config::EngineConfig;
use crate::context::SchemaContext;
use crate::entity::{EntityHandle, Related};
use crate::error::Error;
use crate::partition::{CacheStats, Partition};
use crate::persist::{coerce_attribute, Persister};
use crate::query::{QueryController, SelectionRow};
use crate::reference::RelationshipReference;
use crate::relationship::{CascadeContext, LazyCollection};
use onyx_proto::{Query, Value};

/// Saves, loads, queries and deletes entities of one database.
///
/// Cheap to clone; clones share the underlying context.
#[derive(Clone)]
pub struct EntityManager {
    ctx: Arc<SchemaContext>,
}

impl EntityManager {
    /// Open a database.
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        let ctx = SchemaContext::open(config)?;
        Ok(Self { ctx: Arc::new(ctx) })
    }

    /// Open a throwaway database for tests.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(EngineConfig::temporary())
    }

    /// Shared context.
    pub fn context(&self) -> &Arc<SchemaContext> {
        &self.ctx
    }

    /// Current schema version.
    pub fn schema_version(&self) -> u64 {
        self.ctx.catalog().current_version()
    }

    /// Validate and install a schema, returning its version.
    pub fn apply_schema(&self, bundle: SchemaBundle) -> Result<u64, Error> {
        let version = self.ctx.catalog().apply_schema(bundle)?;
        self.ctx.schema_changed();
        Ok(version)
    }

    fn cascade(&self) -> CascadeContext {
        CascadeContext::new(self.ctx.config().max_cascade_depth)
    }

    /// Save an entity and cascade into its relationships.
    ///
    /// Returns the entity's logical key. An unassigned sequence identifier is
    /// filled in on the entity.
    #[instrument(skip_all, fields(entity = %handle.entity_type()))]
    pub fn save(&self, handle: &EntityHandle) -> Result<RelationshipReference, Error> {
        Persister::new(&self.ctx).save(handle, &mut self.cascade())
    }

    /// Delete an entity and cascade per relationship policy.
    ///
    /// Returns whether a stored record was removed.
    #[instrument(skip_all, fields(entity = %handle.entity_type()))]
    pub fn delete(&self, handle: &EntityHandle) -> Result<bool, Error> {
        Persister::new(&self.ctx).delete(handle, &mut self.cascade())
    }

    /// Load an entity of the default partition by identifier.
    pub fn find_by_id(&self, entity: &str, identifier: impl Into<Value>) -> Result<Option<EntityHandle>, Error> {
        self.find_by_key(entity, identifier.into(), Partition::None)
    }

    /// Load an entity by identifier from the partition holding
    /// `partition_value`.
    pub fn find_by_id_in(
        &self,
        entity: &str,
        identifier: impl Into<Value>,
        partition_value: impl Into<Value>,
    ) -> Result<Option<EntityHandle>, Error> {
        let partition = self
            .ctx
            .partitions()
            .partition_for_value(entity, &partition_value.into(), false)?;
        match partition {
            Some(partition) => self.find_by_key(entity, identifier.into(), partition),
            None => Ok(None),
        }
    }

    fn find_by_key(&self, entity: &str, identifier: Value, partition: Partition) -> Result<Option<EntityHandle>, Error> {
        let descriptor = self.ctx.partitions().descriptor(entity, partition)?;
        let identifier = coerce_attribute(&descriptor, descriptor.identifier_field(), &identifier)?;
        let key = RelationshipReference::new(identifier, partition);
        Persister::new(&self.ctx).load(entity, &key, &mut self.cascade())
    }

    /// Whether a record with this identifier exists in the default partition.
    pub fn exists(&self, entity: &str, identifier: impl Into<Value>) -> Result<bool, Error> {
        let descriptor = self.ctx.partitions().descriptor(entity, Partition::None)?;
        let identifier = coerce_attribute(&descriptor, descriptor.identifier_field(), &identifier.into())?;
        self.ctx
            .partitions()
            .record_store(&descriptor)?
            .exists(&identifier)
    }

    /// Hydrate one relationship of an entity on demand and return the slot.
    pub fn find_relationship(&self, handle: &EntityHandle, relationship: &str) -> Result<Related, Error> {
        Persister::new(&self.ctx).hydrate_relationship(handle, relationship, &mut self.cascade())?;
        handle
            .read()
            .related(relationship)
            .cloned()
            .ok_or_else(|| Error::InvalidConstructor(format!("relationship '{}' was not hydrated", relationship)))
    }

    /// Save one relationship of a stored entity, deferred ones included.
    pub fn save_relationship(&self, handle: &EntityHandle, relationship: &str) -> Result<(), Error> {
        Persister::new(&self.ctx).save_relationship(handle, relationship, &mut self.cascade())
    }

    /// Materialize every member of a lazy collection.
    pub fn initialize(&self, collection: &LazyCollection) -> Result<Vec<EntityHandle>, Error> {
        collection.load()
    }

    /// Hydrated records matching a query.
    pub fn execute_query(&self, query: &Query) -> Result<Vec<EntityHandle>, Error> {
        QueryController::new(&self.ctx, query)?.results()
    }

    /// Projected rows for a selection query.
    pub fn execute_selection(&self, query: &Query) -> Result<Vec<SelectionRow>, Error> {
        QueryController::new(&self.ctx, query)?.selections()
    }

    /// Apply a query's update instructions; returns the number of records
    /// updated.
    pub fn execute_update(&self, query: &Query) -> Result<usize, Error> {
        QueryController::new(&self.ctx, query)?.update()
    }

    /// Delete every record matching a query; returns the number deleted.
    pub fn execute_delete(&self, query: &Query) -> Result<usize, Error> {
        QueryController::new(&self.ctx, query)?.delete()
    }

    /// Number of records matching a query.
    pub fn count(&self, query: &Query) -> Result<u64, Error> {
        let count = QueryController::new(&self.ctx, query)?.count()?;
        debug!(entity = %query.entity, count, "query counted");
        Ok(count)
    }

    /// Partition context cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.partitions().stats()
    }

    /// Evict cached partition state and flush storage.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.ctx.shutdown()?;
        info!("entity manager shut down");
        Ok(())
    }
}
