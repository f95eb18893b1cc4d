//! Schema catalog.
//!
//! The catalog stores entity, field and relationship metadata and hands out
//! per-partition [`EntityDescriptor`]s to the query and relationship layers.

mod catalog;
mod descriptor;
mod entity;
mod field;
mod relationship;
mod schema;
mod types;

pub use catalog::Catalog;
pub use descriptor::EntityDescriptor;
pub use entity::{EntityDef, IdentifierGenerator, LifecycleRules, OrderBy, OrderDirection};
pub use field::FieldDef;
pub use relationship::{CascadePolicy, FetchPolicy, RelationshipDef, RelationshipType};
pub use schema::SchemaBundle;
pub use types::{FieldType, ScalarType};
