//! Field definitions for entities.

use super::types::FieldType;
use rkyv::{Archive, Deserialize, Serialize};

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field data type.
    pub field_type: FieldType,
    /// Whether a secondary index is maintained for this field.
    pub indexed: bool,
}

impl FieldDef {
    /// Create a new field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            indexed: false,
        }
    }

    /// Create a nullable field of the given scalar type.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(
            name,
            FieldType::optional_scalar(field_type.scalar_type()),
        )
    }

    /// Maintain a secondary index for this field.
    pub fn with_index(mut self) -> Self {
        self.indexed = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    #[test]
    fn test_field_builders() {
        let field = FieldDef::new("age", FieldType::scalar(ScalarType::Int32)).with_index();
        assert!(field.indexed);
        assert!(!field.field_type.is_nullable());

        let optional = FieldDef::optional("nickname", FieldType::scalar(ScalarType::String));
        assert!(optional.field_type.is_nullable());
        assert!(!optional.indexed);
    }
}
