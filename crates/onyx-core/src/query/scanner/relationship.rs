//! Relationship scanner: evaluates a dotted path on the related records and
//! maps matches back to their owners.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use super::{by_partition, ScanScope, ScannerFactory};
use crate::error::Error;
use crate::reference::{PartitionReference, ReferenceSet, RelationshipReference};
use crate::relationship::RelationshipController;
use onyx_proto::Criterion;

/// Scanner for a criterion whose path starts with a relationship name.
///
/// Owners are resolved to the keys they link to; the rest of the path is
/// evaluated against those related records by whatever scanner fits the
/// target type, and matching targets are inverted back to their owners.
pub struct RelationshipScanner<'a> {
    scope: ScanScope<'a>,
    target: ScanScope<'a>,
    controller: RelationshipController,
    remainder: Criterion,
}

impl<'a> RelationshipScanner<'a> {
    /// Create a scanner for a dotted criterion.
    ///
    /// Relationship edges are scoped to a partition, so a query spanning
    /// every partition cannot traverse them.
    pub fn new(scope: ScanScope<'a>, criterion: &'a Criterion) -> Result<Self, Error> {
        let (relationship, rest) = criterion.split_path().ok_or_else(|| {
            Error::InvalidQuery(format!("'{}' is not a relationship path", criterion.attribute))
        })?;
        let descriptor = scope.descriptor();
        let def = descriptor.require_relationship(relationship)?;
        if scope.spans_all_partitions() && descriptor.partition_field().is_some() {
            return Err(Error::InvalidQuery(format!(
                "relationship path '{}' cannot be scanned across all partitions",
                criterion.attribute
            )));
        }
        let controller = RelationshipController::new(scope.context(), descriptor.name(), def)?;
        let target = scope.nested(&def.target)?;
        Ok(Self {
            remainder: criterion.leaf_with_attribute(rest),
            scope,
            target,
            controller,
        })
    }

    /// Owners in scope whose related records match.
    pub fn scan(&self) -> Result<ReferenceSet, Error> {
        let partitions = self.scope.partitions();
        let mut owners = Vec::new();
        for key in self.controller.owners()? {
            if self.scope.is_terminated() {
                break;
            }
            let partition = key.partition();
            if !partitions.contains(&partition) {
                continue;
            }
            if let Some(reference) = self.scope.record_store(partition)?.reference_for(&key.identifier)? {
                owners.push((PartitionReference::new(partition, reference), key));
            }
        }
        self.evaluate(owners)
    }

    /// Owners among `existing` whose related records match.
    pub fn scan_within(&self, existing: &ReferenceSet) -> Result<ReferenceSet, Error> {
        let mut owners = Vec::with_capacity(existing.len());
        for (partition, references) in by_partition(existing) {
            let store = self.scope.record_store(partition)?;
            for reference in references {
                if self.scope.is_terminated() {
                    break;
                }
                if let Some(identifier) = store.identifier_for(reference)? {
                    owners.push((
                        PartitionReference::new(partition, reference),
                        RelationshipReference::new(identifier, partition),
                    ));
                }
            }
        }
        self.evaluate(owners)
    }

    fn evaluate(&self, owners: Vec<(PartitionReference, RelationshipReference)>) -> Result<ReferenceSet, Error> {
        let target_name = self.target.descriptor().name().to_string();
        let mut owners_of: BTreeMap<PartitionReference, Vec<PartitionReference>> = BTreeMap::new();

        for (owner_at, owner_key) in &owners {
            if self.scope.is_terminated() {
                return Ok(ReferenceSet::new());
            }
            for member in self.controller.relationship_identifiers_with_reference(owner_key)? {
                let partition = member.partition();
                match self.target.record_store(partition)?.reference_for(&member.identifier)? {
                    Some(reference) => owners_of
                        .entry(PartitionReference::new(partition, reference))
                        .or_default()
                        .push(*owner_at),
                    None => warn!(
                        entity = %target_name,
                        key = %member,
                        owner = %owner_key,
                        "dangling relationship edge skipped"
                    ),
                }
            }
        }

        let candidates: ReferenceSet = owners_of.keys().copied().collect();
        let factory = ScannerFactory::new(self.target.clone());
        let matched = factory.create(&self.remainder)?.scan_within(&candidates)?;
        trace!(
            entity = %target_name,
            candidates = candidates.len(),
            matched = matched.references.len(),
            "relationship path evaluated"
        );

        Ok(matched
            .references
            .iter()
            .filter_map(|target| owners_of.get(target))
            .flatten()
            .copied()
            .collect())
    }
}
