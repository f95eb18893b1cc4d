//! Relationship edge store for one relationship of one entity.

use std::collections::BTreeSet;

use rkyv::{Archive, Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::Error;
use crate::reference::RelationshipReference;

/// Persisted form of an edge: relationship keys of its members.
#[derive(Debug, Archive, Serialize, Deserialize)]
enum EdgeRecord {
    One(Vec<u8>),
    Many(Vec<Vec<u8>>),
}

/// Stored value of a relationship edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEdge {
    /// A to-one link.
    One(RelationshipReference),
    /// A to-many link set.
    Many(BTreeSet<RelationshipReference>),
}

impl StoredEdge {
    /// Members of the edge as a set; a to-one edge becomes a singleton.
    pub fn into_set(self) -> BTreeSet<RelationshipReference> {
        match self {
            StoredEdge::One(r) => BTreeSet::from([r]),
            StoredEdge::Many(set) => set,
        }
    }

    /// The single member of a to-one edge, or the first member of a set.
    pub fn into_one(self) -> Option<RelationshipReference> {
        match self {
            StoredEdge::One(r) => Some(r),
            StoredEdge::Many(set) => set.into_iter().next(),
        }
    }

    fn encode(&self) -> Result<Vec<u8>, Error> {
        let record = match self {
            StoredEdge::One(r) => EdgeRecord::One(r.as_key().to_vec()),
            StoredEdge::Many(set) => {
                EdgeRecord::Many(set.iter().map(|r| r.as_key().to_vec()).collect())
            }
        };
        rkyv::to_bytes::<rkyv::rancor::Error>(&record)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, Error> {
        // sled inlines short values without alignment
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        let record = rkyv::from_bytes::<EdgeRecord, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        match record {
            EdgeRecord::One(key) => Ok(StoredEdge::One(RelationshipReference::from_key(&key)?)),
            EdgeRecord::Many(keys) => keys
                .iter()
                .map(|key| RelationshipReference::from_key(key))
                .collect::<Result<BTreeSet<_>, _>>()
                .map(StoredEdge::Many),
        }
    }
}

/// Edge storage for one relationship, keyed by owner.
pub trait RelationshipStore: Send + Sync {
    /// Stored edge of an owner.
    fn get(&self, owner: &RelationshipReference) -> Result<Option<StoredEdge>, Error>;

    /// Replace the stored edge of an owner.
    fn put(&self, owner: &RelationshipReference, edge: &StoredEdge) -> Result<(), Error>;

    /// Remove and return the stored edge of an owner.
    fn remove(&self, owner: &RelationshipReference) -> Result<Option<StoredEdge>, Error>;

    /// Atomically replace (or with `None`, remove) an owner's edge,
    /// returning the previous one.
    fn replace(
        &self,
        owner: &RelationshipReference,
        edge: Option<&StoredEdge>,
    ) -> Result<Option<StoredEdge>, Error>;

    /// Every owner holding an edge.
    fn owners(&self) -> Result<Vec<RelationshipReference>, Error>;

    /// Members of an owner's edge as a set.
    fn get_many(&self, owner: &RelationshipReference) -> Result<BTreeSet<RelationshipReference>, Error> {
        Ok(self.get(owner)?.map(StoredEdge::into_set).unwrap_or_default())
    }

    /// Single member of an owner's edge.
    fn get_one(&self, owner: &RelationshipReference) -> Result<Option<RelationshipReference>, Error> {
        Ok(self.get(owner)?.and_then(StoredEdge::into_one))
    }

    /// Store a to-many edge; an empty set removes the edge.
    fn put_many(
        &self,
        owner: &RelationshipReference,
        members: BTreeSet<RelationshipReference>,
    ) -> Result<(), Error> {
        if members.is_empty() {
            self.remove(owner)?;
            Ok(())
        } else {
            self.put(owner, &StoredEdge::Many(members))
        }
    }
}

/// Sled-backed relationship store, one tree per (entity, relationship).
pub struct SledRelationshipStore {
    tree: Tree,
}

impl SledRelationshipStore {
    pub(crate) fn open(db: &Db, entity: &str, relationship: &str) -> Result<Self, Error> {
        let tree = db.open_tree(format!("rel:{}:{}", entity, relationship))?;
        Ok(Self { tree })
    }
}

impl RelationshipStore for SledRelationshipStore {
    fn get(&self, owner: &RelationshipReference) -> Result<Option<StoredEdge>, Error> {
        match self.tree.get(owner.as_key())? {
            Some(bytes) => Ok(Some(StoredEdge::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, owner: &RelationshipReference, edge: &StoredEdge) -> Result<(), Error> {
        self.tree.insert(owner.as_key(), edge.encode()?)?;
        Ok(())
    }

    fn remove(&self, owner: &RelationshipReference) -> Result<Option<StoredEdge>, Error> {
        match self.tree.remove(owner.as_key())? {
            Some(bytes) => Ok(Some(StoredEdge::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn replace(
        &self,
        owner: &RelationshipReference,
        edge: Option<&StoredEdge>,
    ) -> Result<Option<StoredEdge>, Error> {
        let encoded = edge.map(StoredEdge::encode).transpose()?;
        let previous = self
            .tree
            .fetch_and_update(owner.as_key(), |_| encoded.clone())?;
        previous.map(|bytes| StoredEdge::decode(&bytes)).transpose()
    }

    fn owners(&self) -> Result<Vec<RelationshipReference>, Error> {
        let mut owners = Vec::new();
        for k in self.tree.iter().keys() {
            owners.push(RelationshipReference::from_key(&k?)?);
        }
        Ok(owners)
    }
}
