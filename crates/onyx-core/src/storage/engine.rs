//! Storage engine implementation.

use super::{SledIndexStore, SledRecordStore, SledRelationshipStore, StorageConfig};
use crate::error::Error;
use crate::storage::key;
use onyx_proto::Value;
use sled::{Db, Tree};
use tracing::debug;

/// Tree name for named sequences.
const SEQUENCE_TREE: &str = "meta:sequences";

/// Tree name for the partition registry (value -> id).
const PARTITION_TREE: &str = "meta:partitions";

/// Tree name for the reverse partition registry (id -> value).
const PARTITION_REV_TREE: &str = "meta:partitions_rev";

/// Separator between entity name and payload in registry keys.
const ENTITY_SEPARATOR: u8 = 0x00;

/// The storage engine wrapping sled.
///
/// Hands out record, index and relationship stores and owns the persisted
/// sequences and partition registry they depend on.
pub struct StorageEngine {
    /// The underlying sled database.
    db: Db,

    /// Configuration the engine was opened with.
    config: StorageConfig,

    /// Named monotonic counters.
    sequence_tree: Tree,

    /// `entity 0x00 encoded_value` -> partition id.
    partition_tree: Tree,

    /// `entity 0x00 id` -> encoded value.
    partition_rev_tree: Tree,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let sequence_tree = db.open_tree(SEQUENCE_TREE)?;
        let partition_tree = db.open_tree(PARTITION_TREE)?;
        let partition_rev_tree = db.open_tree(PARTITION_REV_TREE)?;

        debug!(path = %config.path.display(), temporary = config.temporary, "storage opened");

        Ok(Self {
            db,
            config,
            sequence_tree,
            partition_tree,
            partition_rev_tree,
        })
    }

    /// Open a temporary engine, deleted on drop.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(StorageConfig::temporary())
    }

    /// The underlying sled database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Configuration the engine was opened with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Advance a named sequence and return its new value (first value is 1).
    pub fn next_sequence(&self, name: &str) -> Result<i64, Error> {
        let updated = self.sequence_tree.update_and_fetch(name, |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(i64::from_be_bytes)
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;

        let bytes = updated
            .ok_or_else(|| Error::InvalidData(format!("sequence '{}' vanished", name)))?;
        let buf = <[u8; 8]>::try_from(&bytes[..])
            .map_err(|_| Error::InvalidData(format!("sequence '{}' must be 8 bytes", name)))?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Open the record store of an entity in one partition.
    pub fn record_store(
        &self,
        entity: &str,
        partition: i64,
        identity_field: &str,
    ) -> Result<SledRecordStore, Error> {
        SledRecordStore::open(&self.db, entity, partition, identity_field)
    }

    /// Open the index store of one field of an entity in one partition.
    pub fn index_store(
        &self,
        entity: &str,
        partition: i64,
        field: &str,
    ) -> Result<SledIndexStore, Error> {
        SledIndexStore::open(&self.db, entity, partition, field)
    }

    /// Open the edge store of one relationship of an entity.
    pub fn relationship_store(
        &self,
        entity: &str,
        relationship: &str,
    ) -> Result<SledRelationshipStore, Error> {
        SledRelationshipStore::open(&self.db, entity, relationship)
    }

    /// Resolve the partition id registered for a partition value.
    ///
    /// With `create`, an unknown value is registered under a fresh id. Ids
    /// start at 1; zero is the unpartitioned store.
    pub fn partition_id(&self, entity: &str, value: &Value, create: bool) -> Result<Option<i64>, Error> {
        let registry_key = registry_key(entity, &key::encode_value(value));
        if let Some(bytes) = self.partition_tree.get(&registry_key)? {
            return Ok(Some(key::decode_reference(&bytes)?));
        }
        if !create {
            return Ok(None);
        }

        let fresh = self.next_sequence(&format!("partition:{}", entity))?;
        let swapped = self.partition_tree.compare_and_swap(
            &registry_key,
            None as Option<&[u8]>,
            Some(&key::encode_reference(fresh)[..]),
        )?;

        match swapped {
            Ok(()) => {
                let rev_key = registry_key_for_id(entity, fresh);
                self.partition_rev_tree
                    .insert(rev_key, key::encode_value(value))?;
                debug!(entity, %value, partition = fresh, "partition registered");
                Ok(Some(fresh))
            }
            // another writer registered the value first
            Err(conflict) => match conflict.current {
                Some(bytes) => Ok(Some(key::decode_reference(&bytes)?)),
                None => Err(Error::InvalidData(format!(
                    "partition registration for {} lost without a winner",
                    entity
                ))),
            },
        }
    }

    /// Every partition id registered for an entity, in id order.
    pub fn partitions(&self, entity: &str) -> Result<Vec<i64>, Error> {
        let prefix = registry_key(entity, &[]);
        let mut ids = Vec::new();
        for entry in self.partition_rev_tree.scan_prefix(&prefix) {
            let (k, _) = entry?;
            ids.push(key::decode_reference(&k[prefix.len()..])?);
        }
        Ok(ids)
    }

    /// Partition value registered under an id.
    pub fn partition_value(&self, entity: &str, id: i64) -> Result<Option<Value>, Error> {
        match self.partition_rev_tree.get(registry_key_for_id(entity, id))? {
            Some(bytes) => Ok(Some(key::decode_value(&bytes)?.0)),
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the size of the database on disk.
    pub fn size_on_disk(&self) -> Result<u64, Error> {
        Ok(self.db.size_on_disk()?)
    }
}

fn registry_key(entity: &str, payload: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(entity.len() + 1 + payload.len());
    k.extend_from_slice(entity.as_bytes());
    k.push(ENTITY_SEPARATOR);
    k.extend_from_slice(payload);
    k
}

fn registry_key_for_id(entity: &str, id: i64) -> Vec<u8> {
    registry_key(entity, &key::encode_reference(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RecordStore, StoredEdge, RelationshipStore};
    use crate::storage::codec::Attributes;
    use crate::partition::Partition;
    use crate::reference::RelationshipReference;

    #[test]
    fn test_sequences_are_monotonic() {
        let engine = StorageEngine::temporary().unwrap();
        assert_eq!(engine.next_sequence("Person").unwrap(), 1);
        assert_eq!(engine.next_sequence("Person").unwrap(), 2);
        assert_eq!(engine.next_sequence("Pet").unwrap(), 1);
    }

    #[test]
    fn test_partition_registry() {
        let engine = StorageEngine::temporary().unwrap();
        let eu = Value::String("eu".into());
        let us = Value::String("us".into());

        assert_eq!(engine.partition_id("Order", &eu, false).unwrap(), None);
        let eu_id = engine.partition_id("Order", &eu, true).unwrap().unwrap();
        let us_id = engine.partition_id("Order", &us, true).unwrap().unwrap();

        assert!(eu_id > 0);
        assert_ne!(eu_id, us_id);
        assert_eq!(engine.partition_id("Order", &eu, true).unwrap(), Some(eu_id));
        assert_eq!(engine.partitions("Order").unwrap(), vec![eu_id, us_id]);
        assert_eq!(engine.partition_value("Order", us_id).unwrap(), Some(us));
        assert!(engine.partitions("Invoice").unwrap().is_empty());
    }

    #[test]
    fn test_stores_are_isolated_by_partition() {
        let engine = StorageEngine::temporary().unwrap();
        let a = engine.record_store("Order", 1, "id").unwrap();
        let b = engine.record_store("Order", 2, "id").unwrap();

        let mut attrs = Attributes::new();
        attrs.insert("id".into(), Value::Int64(1));
        a.save(&Value::Int64(1), &attrs).unwrap();

        assert_eq!(a.size(), 1);
        assert_eq!(b.size(), 0);
    }

    #[test]
    fn test_reopen_keeps_registry() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let owner = RelationshipReference::new(Value::Int64(1), Partition::None);
        let id = {
            let engine = StorageEngine::open(config.clone()).unwrap();
            let id = engine
                .partition_id("Order", &Value::Int32(7), true)
                .unwrap()
                .unwrap();
            let edges = engine.relationship_store("Order", "lines").unwrap();
            edges.put(&owner, &StoredEdge::One(owner.clone())).unwrap();
            engine.flush().unwrap();
            id
        };

        let engine = StorageEngine::open(config).unwrap();
        assert_eq!(engine.partition_id("Order", &Value::Int64(7), false).unwrap(), Some(id));
        let edges = engine.relationship_store("Order", "lines").unwrap();
        assert_eq!(edges.get_one(&owner).unwrap(), Some(owner));
    }
}
