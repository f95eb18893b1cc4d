//! Record store: identifier to reference mapping and record bodies for one
//! (entity, partition) pair.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::trace;

use super::codec::{self, Attributes};
use super::key;
use crate::error::Error;
use crate::reference::Reference;
use onyx_proto::Value;

/// Record storage for one entity type in one partition.
pub trait RecordStore: Send + Sync {
    /// Reference of the record with this identifier.
    fn reference_for(&self, identifier: &Value) -> Result<Option<Reference>, Error>;

    /// Identifier of the record at this reference.
    fn identifier_for(&self, reference: Reference) -> Result<Option<Value>, Error>;

    /// Full attribute map of the record at this reference.
    fn get(&self, reference: Reference) -> Result<Option<Attributes>, Error>;

    /// One attribute of the record at this reference.
    ///
    /// `None` means the record does not exist; an absent attribute reads as null.
    fn get_attribute(&self, reference: Reference, attribute: &str) -> Result<Option<Value>, Error>;

    /// Insert or overwrite the record with this identifier.
    ///
    /// An existing record keeps its reference; a new one gets a fresh one.
    fn save(&self, identifier: &Value, attributes: &Attributes) -> Result<Reference, Error>;

    /// Remove the record with this identifier, returning its old reference.
    fn delete(&self, identifier: &Value) -> Result<Option<Reference>, Error>;

    /// Whether a record with this identifier exists.
    fn exists(&self, identifier: &Value) -> Result<bool, Error>;

    /// Number of stored records.
    fn size(&self) -> u64;

    /// Every reference in the store, in reference order.
    fn references(&self) -> Result<Vec<Reference>, Error>;

    /// References whose identifier compares above `identifier`.
    fn references_above(&self, identifier: &Value, inclusive: bool)
        -> Result<Vec<Reference>, Error>;

    /// References whose identifier compares below `identifier`.
    fn references_below(&self, identifier: &Value, inclusive: bool)
        -> Result<Vec<Reference>, Error>;
}

/// Sled-backed record store.
///
/// Two trees per (entity, partition):
/// - `records:` maps encoded reference to the encoded attribute map
/// - `ids:` maps encoded identifier to encoded reference, in identifier order
pub struct SledRecordStore {
    db: Db,
    records: Tree,
    ids: Tree,
    identity_field: String,
}

impl SledRecordStore {
    pub(crate) fn open(
        db: &Db,
        entity: &str,
        partition: i64,
        identity_field: &str,
    ) -> Result<Self, Error> {
        let records = db.open_tree(format!("records:{}:{}", entity, partition))?;
        let ids = db.open_tree(format!("ids:{}:{}", entity, partition))?;
        Ok(Self {
            db: db.clone(),
            records,
            ids,
            identity_field: identity_field.to_string(),
        })
    }

    fn next_reference(&self) -> Result<Reference, Error> {
        // generate_id starts at zero; references are strictly positive
        Ok(self.db.generate_id()? as Reference + 1)
    }

    fn range(&self, (start, end): (Vec<u8>, Vec<u8>)) -> Result<Vec<Reference>, Error> {
        let mut refs = Vec::new();
        for entry in self.ids.range(start..end) {
            let (_, value) = entry?;
            refs.push(key::decode_reference(&value)?);
        }
        Ok(refs)
    }
}

fn abort(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(e),
    }
}

impl RecordStore for SledRecordStore {
    fn reference_for(&self, identifier: &Value) -> Result<Option<Reference>, Error> {
        match self.ids.get(key::encode_value(identifier))? {
            Some(bytes) => Ok(Some(key::decode_reference(&bytes)?)),
            None => Ok(None),
        }
    }

    fn identifier_for(&self, reference: Reference) -> Result<Option<Value>, Error> {
        match self.records.get(key::encode_reference(reference))? {
            Some(bytes) => Ok(Some(
                codec::get_field(&bytes, &self.identity_field)?.unwrap_or(Value::Null),
            )),
            None => Ok(None),
        }
    }

    fn get(&self, reference: Reference) -> Result<Option<Attributes>, Error> {
        match self.records.get(key::encode_reference(reference))? {
            Some(bytes) => Ok(Some(codec::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_attribute(&self, reference: Reference, attribute: &str) -> Result<Option<Value>, Error> {
        match self.records.get(key::encode_reference(reference))? {
            Some(bytes) => Ok(Some(
                codec::get_field(&bytes, attribute)?.unwrap_or(Value::Null),
            )),
            None => Ok(None),
        }
    }

    fn save(&self, identifier: &Value, attributes: &Attributes) -> Result<Reference, Error> {
        let id_key = key::encode_value(identifier);
        let body = codec::encode_record(attributes)?;
        // sled id generation blocks inside a transaction; a re-save wastes one id
        let fresh = self.next_reference()?;
        let reference = (&self.ids, &self.records)
            .transaction(|(ids, records)| {
                let reference = match ids.get(id_key.as_slice())? {
                    Some(bytes) => key::decode_reference(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?,
                    None => {
                        ids.insert(id_key.as_slice(), &key::encode_reference(fresh)[..])?;
                        fresh
                    }
                };
                records.insert(&key::encode_reference(reference)[..], body.as_slice())?;
                Ok(reference)
            })
            .map_err(abort)?;

        trace!(%identifier, reference, "record saved");
        Ok(reference)
    }

    fn delete(&self, identifier: &Value) -> Result<Option<Reference>, Error> {
        let id_key = key::encode_value(identifier);
        (&self.ids, &self.records)
            .transaction(|(ids, records)| match ids.remove(id_key.as_slice())? {
                Some(bytes) => {
                    let reference = key::decode_reference(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?;
                    records.remove(&key::encode_reference(reference)[..])?;
                    Ok(Some(reference))
                }
                None => Ok(None),
            })
            .map_err(abort)
    }

    fn exists(&self, identifier: &Value) -> Result<bool, Error> {
        Ok(self.ids.contains_key(key::encode_value(identifier))?)
    }

    fn size(&self) -> u64 {
        self.records.len() as u64
    }

    fn references(&self) -> Result<Vec<Reference>, Error> {
        let mut refs = Vec::with_capacity(self.records.len());
        for k in self.records.iter().keys() {
            refs.push(key::decode_reference(&k?)?);
        }
        Ok(refs)
    }

    fn references_above(
        &self,
        identifier: &Value,
        inclusive: bool,
    ) -> Result<Vec<Reference>, Error> {
        self.range(key::comparison_range(identifier, true, inclusive))
    }

    fn references_below(
        &self,
        identifier: &Value,
        inclusive: bool,
    ) -> Result<Vec<Reference>, Error> {
        self.range(key::comparison_range(identifier, false, inclusive))
    }
}
