//! Record handles: physical references, partition references and the
//! logical keys relationship edges are stored under.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use onyx_proto::Value;

use crate::catalog::IdentifierGenerator;
use crate::error::Error;
use crate::partition::Partition;
use crate::storage::key;

/// Physical slot of a record inside one partition's record store.
pub type Reference = i64;

/// A reference qualified by the partition that owns it.
///
/// Orders by partition id, then reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionReference {
    /// Partition id; zero is the unpartitioned store.
    pub partition: i64,
    /// Reference within that partition.
    pub reference: Reference,
}

impl PartitionReference {
    /// Create a partition reference.
    pub fn new(partition: Partition, reference: Reference) -> Self {
        Self {
            partition: partition.id(),
            reference,
        }
    }

    /// Partition of this reference.
    pub fn partition(&self) -> Partition {
        Partition::from_id(self.partition)
    }
}

impl fmt::Display for PartitionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.reference)
    }
}

/// Ordered set of matched records.
pub type ReferenceSet = BTreeSet<PartitionReference>;

/// Logical key of a related record: its identifier plus partition.
///
/// Relationship edges are stored under these rather than physical
/// references so that links survive relocation. Equality follows the
/// identifier's key encoding, so `Int32(1)` and `Int64(1)` are the same key.
#[derive(Debug, Clone)]
pub struct RelationshipReference {
    /// Identifier of the related record.
    pub identifier: Value,
    /// Partition id of the related record.
    pub partition: i64,
    encoded: Vec<u8>,
}

impl RelationshipReference {
    /// Create a relationship reference.
    pub fn new(identifier: Value, partition: Partition) -> Self {
        let partition = partition.id();
        let mut encoded = key::encode_value(&identifier);
        encoded.extend_from_slice(&key::encode_reference(partition));
        Self {
            identifier,
            partition,
            encoded,
        }
    }

    /// Partition of the related record.
    pub fn partition(&self) -> Partition {
        Partition::from_id(self.partition)
    }

    /// Byte key used by relationship stores.
    pub fn as_key(&self) -> &[u8] {
        &self.encoded
    }

    /// Decode a key produced by [`RelationshipReference::as_key`].
    pub fn from_key(bytes: &[u8]) -> Result<Self, Error> {
        let (identifier, used) = key::decode_value(bytes)?;
        let partition = key::decode_reference(&bytes[used..])?;
        if bytes.len() != used + key::REFERENCE_SIZE {
            return Err(Error::InvalidData(
                "trailing bytes after relationship reference".into(),
            ));
        }
        Ok(Self::new(identifier, Partition::from_id(partition)))
    }
}

impl PartialEq for RelationshipReference {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl Eq for RelationshipReference {}

impl Hash for RelationshipReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl PartialOrd for RelationshipReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelationshipReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl fmt::Display for RelationshipReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.partition)
    }
}

/// Identifier of an entity, distinguishing records that still need one.
#[derive(Debug, Clone, PartialEq)]
pub enum Identifier {
    /// No identifier yet; a sequence will assign one on save.
    Unassigned,
    /// An assigned identifier.
    Value(Value),
}

impl Identifier {
    /// Interpret an identifier attribute.
    ///
    /// Null is always unassigned; under a sequence generator so are zero and
    /// negative integers.
    pub fn from_value(value: Option<&Value>, generator: IdentifierGenerator) -> Self {
        match value {
            None | Some(Value::Null) => Identifier::Unassigned,
            Some(v) if generator == IdentifierGenerator::Sequence => match v.as_i64() {
                Some(n) if n <= 0 => Identifier::Unassigned,
                _ => Identifier::Value(v.clone()),
            },
            Some(v) => Identifier::Value(v.clone()),
        }
    }

    /// Whether an identifier is assigned.
    pub fn is_assigned(&self) -> bool {
        matches!(self, Identifier::Value(_))
    }

    /// Assigned identifier value.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Identifier::Unassigned => None,
            Identifier::Value(v) => Some(v),
        }
    }
}
