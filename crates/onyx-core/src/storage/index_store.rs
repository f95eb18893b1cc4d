//! Secondary index store for one indexed field.

use sled::{Db, Tree};

use super::key;
use crate::error::Error;
use crate::reference::Reference;
use onyx_proto::Value;

/// Ordered mapping from field value to references, for one field of one
/// entity in one partition.
pub trait IndexStore: Send + Sync {
    /// References whose value equals `value`.
    fn find_equal(&self, value: &Value) -> Result<Vec<Reference>, Error>;

    /// References whose value compares above `value`.
    fn find_above(&self, value: &Value, inclusive: bool) -> Result<Vec<Reference>, Error>;

    /// References whose value compares below `value`.
    fn find_below(&self, value: &Value, inclusive: bool) -> Result<Vec<Reference>, Error>;

    /// Index `value` under `new_reference`, dropping the entry of `old_reference`.
    fn insert(
        &self,
        value: &Value,
        old_reference: Option<Reference>,
        new_reference: Reference,
    ) -> Result<(), Error>;

    /// Drop the entry of `reference`.
    fn delete(&self, reference: Reference) -> Result<(), Error>;
}

/// Sled-backed index store.
///
/// Key format of the forward tree: `[encoded_value][reference:8]`, empty value.
/// The reverse tree maps `[reference:8]` to `[encoded_value]` so entries can
/// be dropped by reference alone.
pub struct SledIndexStore {
    forward: Tree,
    reverse: Tree,
}

impl SledIndexStore {
    pub(crate) fn open(db: &Db, entity: &str, partition: i64, field: &str) -> Result<Self, Error> {
        let forward = db.open_tree(format!("index:{}:{}:{}", entity, partition, field))?;
        let reverse = db.open_tree(format!("index_rev:{}:{}:{}", entity, partition, field))?;
        Ok(Self { forward, reverse })
    }

    fn reference_of(entry_key: &[u8]) -> Result<Reference, Error> {
        let start = entry_key
            .len()
            .checked_sub(key::REFERENCE_SIZE)
            .ok_or_else(|| Error::InvalidData("index key shorter than a reference".into()))?;
        key::decode_reference(&entry_key[start..])
    }

    fn collect(
        &self,
        entries: impl Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
    ) -> Result<Vec<Reference>, Error> {
        let mut refs = Vec::new();
        for entry in entries {
            let (entry_key, _) = entry?;
            refs.push(Self::reference_of(&entry_key)?);
        }
        Ok(refs)
    }
}

impl IndexStore for SledIndexStore {
    fn find_equal(&self, value: &Value) -> Result<Vec<Reference>, Error> {
        self.collect(self.forward.scan_prefix(key::encode_value(value)))
    }

    fn find_above(&self, value: &Value, inclusive: bool) -> Result<Vec<Reference>, Error> {
        let (start, end) = key::comparison_range(value, true, inclusive);
        self.collect(self.forward.range(start..end))
    }

    fn find_below(&self, value: &Value, inclusive: bool) -> Result<Vec<Reference>, Error> {
        let (start, end) = key::comparison_range(value, false, inclusive);
        self.collect(self.forward.range(start..end))
    }

    fn insert(
        &self,
        value: &Value,
        old_reference: Option<Reference>,
        new_reference: Reference,
    ) -> Result<(), Error> {
        if let Some(old) = old_reference {
            self.delete(old)?;
        }
        // a reference holds at most one value
        self.delete(new_reference)?;

        let encoded = key::encode_value(value);
        let reference_key = key::encode_reference(new_reference);
        let mut entry_key = encoded.clone();
        entry_key.extend_from_slice(&reference_key);

        self.forward.insert(entry_key, &[] as &[u8])?;
        self.reverse.insert(&reference_key[..], encoded)?;
        Ok(())
    }

    fn delete(&self, reference: Reference) -> Result<(), Error> {
        let reference_key = key::encode_reference(reference);
        if let Some(encoded) = self.reverse.remove(reference_key)? {
            let mut entry_key = encoded.to_vec();
            entry_key.extend_from_slice(&reference_key);
            self.forward.remove(entry_key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index() -> SledIndexStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledIndexStore::open(&db, "Item", 0, "score").unwrap()
    }

    fn sorted(mut refs: Vec<Reference>) -> Vec<Reference> {
        refs.sort();
        refs
    }

    #[test]
    fn test_insert_and_find_equal() {
        let index = test_index();
        index.insert(&Value::Int32(5), None, 1).unwrap();
        index.insert(&Value::Int64(5), None, 2).unwrap();
        index.insert(&Value::Int32(6), None, 3).unwrap();

        assert_eq!(sorted(index.find_equal(&Value::Int32(5)).unwrap()), vec![1, 2]);
        assert!(index.find_equal(&Value::Int32(7)).unwrap().is_empty());
    }

    #[test]
    fn test_range_lookups() {
        let index = test_index();
        for (reference, score) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            index.insert(&Value::Int64(score), None, reference).unwrap();
        }
        index.insert(&Value::Null, None, 5).unwrap();
        index.insert(&Value::String("x".into()), None, 6).unwrap();

        assert_eq!(sorted(index.find_above(&Value::Int64(20), false).unwrap()), vec![3, 4]);
        assert_eq!(sorted(index.find_above(&Value::Int64(20), true).unwrap()), vec![2, 3, 4]);
        assert_eq!(sorted(index.find_below(&Value::Int64(30), false).unwrap()), vec![1, 2]);
        assert_eq!(sorted(index.find_below(&Value::Int64(30), true).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_reinsert_moves_entry() {
        let index = test_index();
        index.insert(&Value::Int64(1), None, 7).unwrap();
        index.insert(&Value::Int64(2), Some(7), 8).unwrap();

        assert!(index.find_equal(&Value::Int64(1)).unwrap().is_empty());
        assert_eq!(index.find_equal(&Value::Int64(2)).unwrap(), vec![8]);

        // updating the value of the same reference replaces its entry
        index.insert(&Value::Int64(3), None, 8).unwrap();
        assert!(index.find_equal(&Value::Int64(2)).unwrap().is_empty());
        assert_eq!(index.find_equal(&Value::Int64(3)).unwrap(), vec![8]);
    }

    #[test]
    fn test_delete() {
        let index = test_index();
        index.insert(&Value::String("a".into()), None, 1).unwrap();
        index.delete(1).unwrap();
        assert!(index.find_equal(&Value::String("a".into())).unwrap().is_empty());
        index.delete(1).unwrap();
    }
}
