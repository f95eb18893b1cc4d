//! Partitions and the per-context partition cache.
//!
//! Resolving a record's partition means mapping its partition-field value to
//! a registered id, specializing the entity descriptor to that id and opening
//! the partition's stores. [`PartitionContext`] caches every step in bounded
//! LRU maps shared by all queries of one schema context.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::catalog::{Catalog, EntityDescriptor};
use crate::error::Error;
use crate::storage::{key, Attributes, IndexStore, RecordStore, RelationshipStore, StorageEngine};
use onyx_proto::{PartitionSelector, Value};

/// Physical partition of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Partition {
    /// The default, unpartitioned store.
    #[default]
    None,
    /// A registered partition.
    Id(i64),
}

impl Partition {
    /// Numeric id; zero for [`Partition::None`].
    pub fn id(&self) -> i64 {
        match self {
            Partition::None => 0,
            Partition::Id(id) => *id,
        }
    }

    /// Partition for a numeric id; zero maps to [`Partition::None`].
    pub fn from_id(id: i64) -> Self {
        if id == 0 {
            Partition::None
        } else {
            Partition::Id(id)
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::None => write!(f, "none"),
            Partition::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Hit and miss counters of a [`PartitionContext`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a cache.
    pub hits: u64,
    /// Lookups that had to resolve and populate.
    pub misses: u64,
    /// Entries currently held across all caches.
    pub entries: usize,
}

struct BoundedCache<K: Hash + Eq, V: Clone> {
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Compute-if-absent; `resolve` runs outside the lock and the first
    /// value inserted wins.
    fn get_or_try_insert(
        &self,
        key: K,
        stats: &Counters,
        resolve: impl FnOnce() -> Result<V, Error>,
    ) -> Result<V, Error> {
        if let Some(v) = self.entries.lock().get(&key) {
            stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(v.clone());
        }
        stats.misses.fetch_add(1, Ordering::Relaxed);
        let resolved = resolve()?;
        Ok(self.entries.lock().get_or_insert(key, || resolved).clone())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache of partition ids, descriptors and store handles for one schema
/// context.
///
/// Every cache is an LRU bounded by the configured capacity and safe for
/// concurrent populate. Entries are only dropped by LRU pressure or by
/// [`PartitionContext::evict_all`].
pub struct PartitionContext {
    engine: Arc<StorageEngine>,
    catalog: Arc<Catalog>,
    partition_ids: BoundedCache<(String, Vec<u8>), Option<i64>>,
    descriptors: BoundedCache<(String, i64), Arc<EntityDescriptor>>,
    record_stores: BoundedCache<(String, i64), Arc<dyn RecordStore>>,
    index_stores: BoundedCache<(String, i64, String), Arc<dyn IndexStore>>,
    relationship_stores: BoundedCache<(String, String), Arc<dyn RelationshipStore>>,
    counters: Counters,
}

impl PartitionContext {
    /// Create a context with caches bounded to `capacity` entries each.
    pub fn new(engine: Arc<StorageEngine>, catalog: Arc<Catalog>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine,
            catalog,
            partition_ids: BoundedCache::new(capacity),
            descriptors: BoundedCache::new(capacity),
            record_stores: BoundedCache::new(capacity),
            index_stores: BoundedCache::new(capacity),
            relationship_stores: BoundedCache::new(capacity),
            counters: Counters::default(),
        }
    }

    /// The storage engine behind the cached stores.
    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// The catalog descriptors are derived from.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Partition holding records whose partition field equals `value`.
    ///
    /// Null selects the default store. An unregistered value yields `None`
    /// unless `create` registers it.
    pub fn partition_for_value(
        &self,
        entity: &str,
        value: &Value,
        create: bool,
    ) -> Result<Option<Partition>, Error> {
        if value.is_null() {
            return Ok(Some(Partition::None));
        }
        let cache_key = (entity.to_string(), key::encode_value(value));
        let cached = self
            .partition_ids
            .get_or_try_insert(cache_key.clone(), &self.counters, || {
                self.engine.partition_id(entity, value, create)
            })?;

        match cached {
            Some(id) => Ok(Some(Partition::Id(id))),
            None if create => {
                // a cached miss from a read-only lookup; register now
                let id = self.engine.partition_id(entity, value, true)?;
                self.partition_ids.entries.lock().put(cache_key, id);
                Ok(id.map(Partition::Id))
            }
            None => Ok(None),
        }
    }

    /// Partition a record belongs to, registering new partition values.
    pub fn partition_of(&self, descriptor: &EntityDescriptor, attributes: &Attributes) -> Result<Partition, Error> {
        match descriptor.partition_field() {
            None => Ok(Partition::None),
            Some(field) => {
                let value = attributes.get(field).unwrap_or(&Value::Null);
                Ok(self
                    .partition_for_value(descriptor.name(), value, true)?
                    .unwrap_or(Partition::None))
            }
        }
    }

    /// Partitions a selector covers, in id order.
    ///
    /// `All` covers the default store plus every registered partition; a
    /// value that was never registered covers nothing.
    pub fn partitions(&self, entity: &str, selector: &PartitionSelector) -> Result<Vec<Partition>, Error> {
        match selector {
            PartitionSelector::None => Ok(vec![Partition::None]),
            PartitionSelector::Value(value) => Ok(self
                .partition_for_value(entity, value, false)?
                .into_iter()
                .collect()),
            PartitionSelector::All => {
                let mut partitions = vec![Partition::None];
                partitions.extend(
                    self.engine
                        .partitions(entity)?
                        .into_iter()
                        .map(Partition::Id),
                );
                Ok(partitions)
            }
        }
    }

    /// Descriptor of an entity specialized to a partition.
    pub fn descriptor(&self, entity: &str, partition: Partition) -> Result<Arc<EntityDescriptor>, Error> {
        self.descriptors.get_or_try_insert(
            (entity.to_string(), partition.id()),
            &self.counters,
            || {
                let def = self.catalog.entity(entity)?;
                Ok(Arc::new(EntityDescriptor::new(def, partition)))
            },
        )
    }

    /// Record store of a descriptor's partition.
    pub fn record_store(&self, descriptor: &EntityDescriptor) -> Result<Arc<dyn RecordStore>, Error> {
        let partition = descriptor.partition().id();
        self.record_stores.get_or_try_insert(
            (descriptor.name().to_string(), partition),
            &self.counters,
            || {
                let store = self.engine.record_store(
                    descriptor.name(),
                    partition,
                    descriptor.identifier_field(),
                )?;
                Ok(Arc::new(store) as Arc<dyn RecordStore>)
            },
        )
    }

    /// Index store of one field in a descriptor's partition.
    pub fn index_store(&self, descriptor: &EntityDescriptor, field: &str) -> Result<Arc<dyn IndexStore>, Error> {
        let partition = descriptor.partition().id();
        self.index_stores.get_or_try_insert(
            (descriptor.name().to_string(), partition, field.to_string()),
            &self.counters,
            || {
                let store = self.engine.index_store(descriptor.name(), partition, field)?;
                Ok(Arc::new(store) as Arc<dyn IndexStore>)
            },
        )
    }

    /// Edge store of one relationship of an entity.
    pub fn relationship_store(&self, entity: &str, relationship: &str) -> Result<Arc<dyn RelationshipStore>, Error> {
        self.relationship_stores.get_or_try_insert(
            (entity.to_string(), relationship.to_string()),
            &self.counters,
            || {
                let store = self.engine.relationship_store(entity, relationship)?;
                Ok(Arc::new(store) as Arc<dyn RelationshipStore>)
            },
        )
    }

    /// Cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.partition_ids.len()
                + self.descriptors.len()
                + self.record_stores.len()
                + self.index_stores.len()
                + self.relationship_stores.len(),
        }
    }

    /// Drop every cached entry.
    pub fn evict_all(&self) {
        let evicted = self.stats().entries;
        self.partition_ids.clear();
        self.descriptors.clear();
        self.record_stores.clear();
        self.index_stores.clear();
        self.relationship_stores.clear();
        if evicted > 0 {
            info!(evicted, "partition context evicted");
        } else {
            debug!("partition context already empty");
        }
    }
}
