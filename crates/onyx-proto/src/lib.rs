//! Onyx query IR and value types.
//!
//! This crate defines the values stored in records and the query structures
//! consumed by the query controller in `onyx-core`.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for attributes, identifiers and literals
//! - [`query`] - Criteria trees, ordering, pagination and update instructions
//! - [`error`] - Validation error types
//!
//! # Serialization
//!
//! [`Value`] derives `rkyv::Archive` for storage and serde for interchange.
//! Query types derive serde only:
//!
//! ```ignore
//! use onyx_proto::{Criterion, Query};
//!
//! let query = Query::new("Person").with_criterion(Criterion::eq("name", "Ada"));
//! let json = serde_json::to_string(&query).unwrap();
//! ```

pub mod error;
pub mod query;
pub mod value;

pub use error::Error;

pub use query::{
    Combinator, Criterion, Operator, OrderSpec, Pagination, PartitionSelector, Query,
    UpdateInstruction, PATH_SEPARATOR,
};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let value = Value::String("hello".into());
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&value).unwrap();
        let archived =
            rkyv::access::<value::ArchivedValue, rkyv::rancor::Error>(&bytes).unwrap();
        let deserialized: Value =
            rkyv::deserialize::<Value, rkyv::rancor::Error>(archived).unwrap();
        assert_eq!(value, deserialized);
    }

    #[test]
    fn test_query_builder_defaults() {
        let query = Query::new("Person");
        assert!(query.is_default());
        assert_eq!(query.partition, PartitionSelector::None);
        assert!(query.pagination.is_unbounded());
        assert!(query.validate().is_ok());
    }
}
