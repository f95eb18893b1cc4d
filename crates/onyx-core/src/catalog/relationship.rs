//! Relationship definitions between entities.

use rkyv::{Archive, Deserialize, Serialize};

/// Cardinality of a relationship, seen from its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum RelationshipType {
    /// Owner holds at most one target; target holds at most one owner.
    OneToOne,
    /// Owner holds many targets.
    OneToMany,
    /// Owner holds one target that many owners may share.
    ManyToOne,
    /// Owner holds many targets that many owners may share.
    ManyToMany,
}

impl RelationshipType {
    /// Whether the owner side holds a collection.
    pub fn is_to_many(&self) -> bool {
        matches!(
            self,
            RelationshipType::OneToMany | RelationshipType::ManyToMany
        )
    }
}

/// What happens to related records when the owner is saved or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Archive, Serialize, Deserialize)]
pub enum CascadePolicy {
    /// Only links are maintained.
    #[default]
    None,
    /// Saving the owner saves related records.
    Save,
    /// Deleting the owner, or dropping a link, deletes related records.
    Delete,
    /// Both save and delete cascade.
    All,
    /// The relationship is not written on save; callers link it explicitly.
    DeferSave,
}

impl CascadePolicy {
    /// Whether saving cascades into related records.
    pub fn saves(&self) -> bool {
        matches!(self, CascadePolicy::Save | CascadePolicy::All)
    }

    /// Whether deleting cascades into related records.
    pub fn deletes(&self) -> bool {
        matches!(self, CascadePolicy::Delete | CascadePolicy::All)
    }

    /// Whether the relationship is skipped on save.
    pub fn is_deferred(&self) -> bool {
        matches!(self, CascadePolicy::DeferSave)
    }
}

/// When related records are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Archive, Serialize, Deserialize)]
pub enum FetchPolicy {
    /// On first access.
    #[default]
    Lazy,
    /// Together with the owner.
    Eager,
}

/// A relationship declared on an entity.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Relationship name (unique within the owning entity).
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Cardinality.
    pub relationship_type: RelationshipType,
    /// Name of the matching relationship on the target, if bidirectional.
    pub inverse: Option<String>,
    /// Cascade policy.
    pub cascade: CascadePolicy,
    /// Fetch policy.
    pub fetch: FetchPolicy,
}

impl RelationshipDef {
    fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            relationship_type,
            inverse: None,
            cascade: CascadePolicy::None,
            fetch: FetchPolicy::Lazy,
        }
    }

    /// Create a one-to-one relationship.
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, RelationshipType::OneToOne)
    }

    /// Create a one-to-many relationship.
    pub fn one_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, RelationshipType::OneToMany)
    }

    /// Create a many-to-one relationship.
    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, RelationshipType::ManyToOne)
    }

    /// Create a many-to-many relationship.
    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, RelationshipType::ManyToMany)
    }

    /// Name the inverse relationship on the target.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Set the cascade policy.
    pub fn with_cascade(mut self, cascade: CascadePolicy) -> Self {
        self.cascade = cascade;
        self
    }

    /// Set the fetch policy.
    pub fn with_fetch(mut self, fetch: FetchPolicy) -> Self {
        self.fetch = fetch;
        self
    }

    /// Whether the owner side holds a collection.
    pub fn is_to_many(&self) -> bool {
        self.relationship_type.is_to_many()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_builder() {
        let rel = RelationshipDef::one_to_many("children", "Child")
            .with_inverse("parent")
            .with_cascade(CascadePolicy::All)
            .with_fetch(FetchPolicy::Eager);

        assert!(rel.is_to_many());
        assert_eq!(rel.target, "Child");
        assert_eq!(rel.inverse.as_deref(), Some("parent"));
        assert!(rel.cascade.saves());
        assert!(rel.cascade.deletes());
    }

    #[test]
    fn test_cascade_policy_flags() {
        assert!(!CascadePolicy::None.saves());
        assert!(!CascadePolicy::None.deletes());
        assert!(CascadePolicy::Save.saves());
        assert!(!CascadePolicy::Save.deletes());
        assert!(CascadePolicy::Delete.deletes());
        assert!(CascadePolicy::DeferSave.is_deferred());
        assert!(!CascadePolicy::DeferSave.saves());
    }

    #[test]
    fn test_to_one_types() {
        assert!(!RelationshipType::OneToOne.is_to_many());
        assert!(!RelationshipType::ManyToOne.is_to_many());
        assert!(RelationshipType::ManyToMany.is_to_many());
    }
}
