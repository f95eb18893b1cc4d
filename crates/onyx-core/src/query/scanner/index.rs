//! Index scanner: exact and range lookups on a secondary index.

use std::collections::BTreeSet;

use super::{by_partition, ScanScope};
use crate::error::Error;
use crate::partition::Partition;
use crate::reference::{PartitionReference, Reference, ReferenceSet};
use onyx_proto::{Criterion, Operator, Value};

/// Resolves references through the index of one attribute.
pub struct IndexScanner<'a> {
    scope: ScanScope<'a>,
    criterion: &'a Criterion,
    literals: Vec<Value>,
}

impl<'a> IndexScanner<'a> {
    /// Create a scanner; `literals` are already coerced to the attribute type.
    pub fn new(scope: ScanScope<'a>, criterion: &'a Criterion, literals: Vec<Value>) -> Self {
        Self {
            scope,
            criterion,
            literals,
        }
    }

    fn lookup(&self, partition: Partition) -> Result<Vec<Reference>, Error> {
        let Some(first) = self.literals.first() else {
            return Ok(vec![]);
        };
        let descriptor = self.scope.descriptor_in(partition)?;
        let index = self
            .scope
            .context()
            .partitions()
            .index_store(&descriptor, &self.criterion.attribute)?;

        match self.criterion.operator {
            Operator::Equal | Operator::In => {
                let mut found = Vec::new();
                for literal in &self.literals {
                    found.extend(index.find_equal(literal)?);
                }
                Ok(found)
            }
            Operator::GreaterThan => index.find_above(first, false),
            Operator::GreaterThanEqual => index.find_above(first, true),
            Operator::LessThan => index.find_below(first, false),
            Operator::LessThanEqual => index.find_below(first, true),
            other => Err(Error::InvalidQuery(format!(
                "operator {:?} cannot use an index lookup",
                other
            ))),
        }
    }

    /// Matches in every partition in scope.
    pub fn scan(&self) -> Result<ReferenceSet, Error> {
        self.scope.fan_out(|partition| self.lookup(partition))
    }

    /// Matches among `existing`.
    pub fn scan_within(&self, existing: &ReferenceSet) -> Result<ReferenceSet, Error> {
        let mut matched = ReferenceSet::new();
        for (partition, candidates) in by_partition(existing) {
            if self.scope.is_terminated() {
                break;
            }
            let found: BTreeSet<Reference> = self.lookup(partition)?.into_iter().collect();
            matched.extend(
                candidates
                    .into_iter()
                    .filter(|r| found.contains(r))
                    .map(|r| PartitionReference::new(partition, r)),
            );
        }
        Ok(matched)
    }
}
