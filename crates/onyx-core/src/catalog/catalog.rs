//! Catalog manager for storing and retrieving schema metadata.

use super::{EntityDef, SchemaBundle};
use crate::error::Error;
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Tree name for schema bundles.
const SCHEMA_TREE: &str = "catalog:schemas";

/// Tree name for catalog metadata.
const META_TREE: &str = "catalog:meta";

/// Key for current schema version in meta tree.
const CURRENT_VERSION_KEY: &[u8] = b"current_version";

/// The catalog manager for schema metadata.
pub struct Catalog {
    /// Schema bundles tree.
    schema_tree: Tree,
    /// Metadata tree.
    meta_tree: Tree,
    /// Current schema version (cached).
    current_version: AtomicU64,
    /// Current schema (cached).
    current_schema: RwLock<Option<SchemaBundle>>,
    /// Shared entity definitions of the current schema.
    entities: RwLock<HashMap<String, Arc<EntityDef>>>,
}

impl Catalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let schema_tree = db.open_tree(SCHEMA_TREE)?;
        let meta_tree = db.open_tree(META_TREE)?;

        let current_version = match meta_tree.get(CURRENT_VERSION_KEY)? {
            Some(bytes) => {
                let buf = <[u8; 8]>::try_from(&bytes[..]).map_err(|_| {
                    Error::InvalidData("catalog version must be 8 bytes".into())
                })?;
                u64::from_be_bytes(buf)
            }
            None => 0,
        };

        let catalog = Self {
            schema_tree,
            meta_tree,
            current_version: AtomicU64::new(current_version),
            current_schema: RwLock::new(None),
            entities: RwLock::new(HashMap::new()),
        };

        if current_version > 0 {
            if let Some(schema) = catalog.schema_at_version(current_version)? {
                catalog.install(schema);
            }
        }

        Ok(catalog)
    }

    fn install(&self, schema: SchemaBundle) {
        let entities = schema
            .entities
            .values()
            .map(|e| (e.name.clone(), Arc::new(e.clone())))
            .collect();
        *self.entities.write() = entities;
        *self.current_schema.write() = Some(schema);
    }

    /// Get the current schema version.
    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    /// Get the current schema bundle.
    pub fn current_schema(&self) -> Option<SchemaBundle> {
        self.current_schema.read().clone()
    }

    /// Get a schema bundle at a specific version.
    pub fn schema_at_version(&self, version: u64) -> Result<Option<SchemaBundle>, Error> {
        let key = version.to_be_bytes();
        match self.schema_tree.get(key)? {
            Some(bytes) => {
                let schema = SchemaBundle::from_bytes(&bytes)?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    /// Validate and apply a new schema bundle.
    ///
    /// Returns the new version number.
    pub fn apply_schema(&self, mut bundle: SchemaBundle) -> Result<u64, Error> {
        bundle.validate()?;

        let new_version = self.current_version() + 1;
        bundle.version = new_version;

        let key = new_version.to_be_bytes();
        let value = bundle.to_bytes()?;
        self.schema_tree.insert(key, value)?;
        self.meta_tree
            .insert(CURRENT_VERSION_KEY, &new_version.to_be_bytes())?;

        self.current_version.store(new_version, Ordering::SeqCst);
        info!(
            version = new_version,
            entities = bundle.entities.len(),
            "schema applied"
        );
        self.install(bundle);

        Ok(new_version)
    }

    /// Get an entity definition by name from the current schema.
    pub fn get_entity(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.entities.read().get(name).cloned()
    }

    /// Get an entity definition, failing if it is not declared.
    pub fn entity(&self, name: &str) -> Result<Arc<EntityDef>, Error> {
        self.get_entity(name)
            .ok_or_else(|| Error::EntityClassNotFound(name.to_string()))
    }

    /// List all entity names in the current schema.
    pub fn list_entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// List all schema versions.
    pub fn list_versions(&self) -> Result<Vec<u64>, Error> {
        let mut versions = Vec::new();
        for result in self.schema_tree.iter() {
            let (key, _) = result?;
            if let Ok(buf) = <[u8; 8]>::try_from(&key[..]) {
                versions.push(u64::from_be_bytes(buf));
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.schema_tree.flush()?;
        self.meta_tree.flush()?;
        Ok(())
    }
}
