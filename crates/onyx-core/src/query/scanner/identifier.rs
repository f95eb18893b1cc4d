//! Identifier scanner: direct and range lookups on a record store's
//! identifier order.

use std::collections::BTreeSet;

use super::{by_partition, ScanScope};
use crate::error::Error;
use crate::reference::{PartitionReference, Reference, ReferenceSet};
use crate::storage::RecordStore;
use onyx_proto::{Criterion, Operator, Value};

/// Resolves references by identifier value.
pub struct IdentifierScanner<'a> {
    scope: ScanScope<'a>,
    criterion: &'a Criterion,
    literals: Vec<Value>,
}

impl<'a> IdentifierScanner<'a> {
    /// Create a scanner; `literals` are already coerced to the identifier type.
    pub fn new(scope: ScanScope<'a>, criterion: &'a Criterion, literals: Vec<Value>) -> Self {
        Self {
            scope,
            criterion,
            literals,
        }
    }

    fn lookup(&self, store: &dyn RecordStore) -> Result<Vec<Reference>, Error> {
        let Some(first) = self.literals.first() else {
            return Ok(vec![]);
        };
        match self.criterion.operator {
            Operator::Equal | Operator::In => {
                let mut found = Vec::with_capacity(self.literals.len());
                for literal in &self.literals {
                    if let Some(reference) = store.reference_for(literal)? {
                        found.push(reference);
                    }
                }
                Ok(found)
            }
            Operator::GreaterThan => store.references_above(first, false),
            Operator::GreaterThanEqual => store.references_above(first, true),
            Operator::LessThan => store.references_below(first, false),
            Operator::LessThanEqual => store.references_below(first, true),
            other => Err(Error::InvalidQuery(format!(
                "operator {:?} cannot use an identifier lookup",
                other
            ))),
        }
    }

    /// Matches in every partition in scope.
    pub fn scan(&self) -> Result<ReferenceSet, Error> {
        self.scope
            .fan_out(|partition| self.lookup(&*self.scope.record_store(partition)?))
    }

    /// Matches among `existing`.
    pub fn scan_within(&self, existing: &ReferenceSet) -> Result<ReferenceSet, Error> {
        let mut matched = ReferenceSet::new();
        for (partition, candidates) in by_partition(existing) {
            if self.scope.is_terminated() {
                break;
            }
            let store = self.scope.record_store(partition)?;
            let found: BTreeSet<Reference> = self.lookup(&*store)?.into_iter().collect();
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
