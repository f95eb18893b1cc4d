//! Storage layer for Onyx.
//!
//! Record, index and relationship stores backed by sled trees, opened through
//! the [`StorageEngine`].

mod config;
mod engine;
mod index_store;
mod record_store;
mod relationship_store;

pub mod codec;
pub mod key;

pub use codec::Attributes;
pub use config::StorageConfig;
pub use engine::StorageEngine;
pub use index_store::{IndexStore, SledIndexStore};
pub use record_store::{RecordStore, SledRecordStore};
pub use relationship_store::{RelationshipStore, SledRelationshipStore, StoredEdge};
