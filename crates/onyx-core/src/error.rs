//! Core error types.

use thiserror::Error;

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] onyx_proto::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Schema bundle failed validation.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A criterion, ordering or update names an attribute the entity does not declare.
    #[error("attribute '{attribute}' is not declared on entity '{entity}'")]
    AttributeMissing { entity: String, attribute: String },

    /// An update instruction targets the identifier field.
    #[error("attribute '{attribute}' of entity '{entity}' is the identifier and cannot be updated")]
    AttributeUpdate { entity: String, attribute: String },

    /// A value cannot be coerced to the declared field type.
    #[error("attribute '{attribute}' of entity '{entity}' expects {expected}, found {found}")]
    AttributeTypeMismatch {
        entity: String,
        attribute: String,
        expected: String,
        found: String,
    },

    /// Structurally disallowed request.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A relationship edge points at a record that no longer exists.
    #[error("relationship target {entity}({identifier}) does not exist")]
    RelationshipHydration { entity: String, identifier: String },

    /// The entity type is not declared in the current schema.
    #[error("entity type '{0}' not found")]
    EntityClassNotFound(String),

    /// A record cannot be materialized as an entity.
    #[error("cannot construct entity: {0}")]
    InvalidConstructor(String),

    /// A cascade recursed deeper than the configured limit.
    #[error("cascade depth {depth} exceeds limit")]
    CascadeDepthExceeded { depth: usize },

    /// One or more partitions failed during fan-out.
    #[error("{failures} partition(s) failed during fan-out: {first}")]
    PartitionFanout {
        failures: usize,
        #[source]
        first: Box<Error>,
    },

    /// The fan-out worker pool could not be created.
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl Error {
    pub(crate) fn attribute_missing(entity: &str, attribute: &str) -> Self {
        Error::AttributeMissing {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn dangling(entity: &str, identifier: impl std::fmt::Display) -> Self {
        Error::RelationshipHydration {
            entity: entity.to_string(),
            identifier: identifier.to_string(),
        }
    }
}
