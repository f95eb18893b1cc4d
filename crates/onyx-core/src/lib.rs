//! Onyx Core - query planning, execution and the relationship graph engine.
//!
//! This crate provides the embedded entity store behind [`EntityManager`]:
//! the schema catalog, sled-backed record, index and edge stores, the
//! partition context, table scanners, the query controller and the
//! cascade-aware relationship controllers.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod manager;
pub mod partition;
pub mod persist;
pub mod query;
pub mod reference;
pub mod relationship;
pub mod storage;

pub use catalog::{
    CascadePolicy, Catalog, EntityDef, EntityDescriptor, FetchPolicy, FieldDef, FieldType,
    IdentifierGenerator, OrderBy, OrderDirection, RelationshipDef, RelationshipType, ScalarType,
    SchemaBundle,
};
pub use config::EngineConfig;
pub use context::SchemaContext;
pub use entity::{Entity, EntityHandle, Related};
pub use error::Error;
pub use manager::EntityManager;
pub use partition::{CacheStats, Partition, PartitionContext};
pub use persist::Persister;
pub use query::{Projection, QueryController, SelectionRow};
pub use reference::{Identifier, PartitionReference, Reference, ReferenceSet, RelationshipReference};
pub use relationship::{CascadeContext, LazyCollection, RelationshipController};
pub use storage::{StorageConfig, StorageEngine};

/// Re-export protocol types.
pub use onyx_proto as proto;
