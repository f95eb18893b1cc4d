//! Full table scanner: per-record evaluation over a store or candidate set.

use tracing::warn;

use super::{by_partition, ScanResult, ScanScope};
use crate::error::Error;
use crate::partition::Partition;
use crate::query::filter::CriterionEvaluator;
use crate::reference::{PartitionReference, Reference, ReferenceSet};
use onyx_proto::Criterion;

/// Reads every candidate record and compares attribute values.
///
/// When the criterion's subtree only names local attributes the scanner
/// evaluates the whole subtree per record, so the caller does not fold the
/// children again.
pub struct FullTableScanner<'a> {
    scope: ScanScope<'a>,
    criterion: &'a Criterion,
    whole_tree: bool,
}

impl<'a> FullTableScanner<'a> {
    /// Create a scanner evaluating only the node's own leaf.
    pub fn leaf(scope: ScanScope<'a>, criterion: &'a Criterion) -> Self {
        Self {
            scope,
            criterion,
            whole_tree: false,
        }
    }

    /// Create a scanner evaluating the node and all of its children.
    pub fn tree(scope: ScanScope<'a>, criterion: &'a Criterion) -> Self {
        Self {
            scope,
            criterion,
            whole_tree: true,
        }
    }

    /// Whether the scanner evaluates the whole subtree.
    pub fn is_whole_tree(&self) -> bool {
        self.whole_tree
    }

    fn scan_partition(
        &self,
        partition: Partition,
        candidates: Option<Vec<Reference>>,
    ) -> Result<Vec<Reference>, Error> {
        let store = self.scope.record_store(partition)?;
        let evaluator = CriterionEvaluator::new(self.scope.descriptor());
        let candidates = match candidates {
            Some(c) => c,
            None => store.references()?,
        };

        let mut matched = Vec::new();
        for reference in candidates {
            if self.scope.is_terminated() {
                break;
            }
            let Some(record) = store.get(reference)? else {
                warn!(
                    entity = %self.scope.descriptor().name(),
                    partition = %partition,
                    reference,
                    "record vanished during scan; skipped"
                );
                continue;
            };
            let hit = if self.whole_tree {
                evaluator.matches_tree(self.criterion, &record)
            } else {
                evaluator.matches_leaf(self.criterion, &record)
            };
            if hit {
                matched.push(reference);
            }
        }
        Ok(matched)
    }

    /// Matches among every record in scope.
    pub fn scan(&self) -> Result<ScanResult, Error> {
        let references = self
            .scope
            .fan_out(|partition| self.scan_partition(partition, None))?;
        Ok(ScanResult {
            references,
            complete: self.whole_tree,
        })
    }

    /// Matches among `existing`.
    pub fn scan_within(&self, existing: &ReferenceSet) -> Result<ScanResult, Error> {
        let mut references = ReferenceSet::new();
        for (partition, candidates) in by_partition(existing) {
            if self.scope.is_terminated() {
                break;
            }
            references.extend(
                self.scan_partition(partition, Some(candidates))?
                    .into_iter()
                    .map(|r| PartitionReference::new(partition, r)),
            );
        }
        Ok(ScanResult {
            references,
            complete: self.whole_tree,
        })
    }
}
