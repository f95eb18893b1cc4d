//! Table scanners: the access paths a criterion can be answered by.
//!
//! [`ScannerFactory`] picks one [`TableScanner`] per criterion node. Every
//! scanner supports two forms:
//! - [`TableScanner::scan`] evaluates against every record in scope
//! - [`TableScanner::scan_within`] evaluates only against a candidate set
//!
//! Scanners check the query's termination flag between units of work and
//! return what they have so far once it is set.

mod factory;
mod full_table;
mod identifier;
mod index;
mod relationship;

pub use factory::ScannerFactory;
pub use full_table::FullTableScanner;
pub use identifier::IdentifierScanner;
pub use index::IndexScanner;
pub use relationship::RelationshipScanner;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::catalog::EntityDescriptor;
use crate::context::SchemaContext;
use crate::error::Error;
use crate::partition::Partition;
use crate::reference::{PartitionReference, Reference, ReferenceSet};
use crate::storage::RecordStore;
use onyx_proto::{PartitionSelector, Query};

/// Records matched by one scanner.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Matched records.
    pub references: ReferenceSet,
    /// Whether the scanner already folded the node's children in.
    pub complete: bool,
}

impl ScanResult {
    fn partial(references: ReferenceSet) -> Self {
        Self {
            references,
            complete: false,
        }
    }
}

/// Access path chosen for a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerKind {
    Identifier,
    Index,
    FullTable,
    Relationship,
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScannerKind::Identifier => "identifier",
            ScannerKind::Index => "index",
            ScannerKind::FullTable => "full-table",
            ScannerKind::Relationship => "relationship",
        };
        f.write_str(name)
    }
}

/// A scanner for one criterion node.
pub enum TableScanner<'a> {
    Identifier(IdentifierScanner<'a>),
    Index(IndexScanner<'a>),
    FullTable(FullTableScanner<'a>),
    Relationship(RelationshipScanner<'a>),
}

impl TableScanner<'_> {
    /// Access path of this scanner.
    pub fn kind(&self) -> ScannerKind {
        match self {
            TableScanner::Identifier(_) => ScannerKind::Identifier,
            TableScanner::Index(_) => ScannerKind::Index,
            TableScanner::FullTable(_) => ScannerKind::FullTable,
            TableScanner::Relationship(_) => ScannerKind::Relationship,
        }
    }

    /// Evaluate against every record in scope.
    pub fn scan(&self) -> Result<ScanResult, Error> {
        match self {
            TableScanner::Identifier(s) => s.scan().map(ScanResult::partial),
            TableScanner::Index(s) => s.scan().map(ScanResult::partial),
            TableScanner::FullTable(s) => s.scan(),
            TableScanner::Relationship(s) => s.scan().map(ScanResult::partial),
        }
    }

    /// Evaluate against the records of `existing` only.
    pub fn scan_within(&self, existing: &ReferenceSet) -> Result<ScanResult, Error> {
        match self {
            TableScanner::Identifier(s) => s.scan_within(existing).map(ScanResult::partial),
            TableScanner::Index(s) => s.scan_within(existing).map(ScanResult::partial),
            TableScanner::FullTable(s) => s.scan_within(existing),
            TableScanner::Relationship(s) => s.scan_within(existing).map(ScanResult::partial),
        }
    }
}

/// Entity type, partitions and cancellation flag shared by the scanners of
/// one query.
#[derive(Clone)]
pub struct ScanScope<'a> {
    ctx: &'a SchemaContext,
    query: &'a Query,
    descriptor: Arc<EntityDescriptor>,
    partitions: Vec<Partition>,
}

impl<'a> ScanScope<'a> {
    /// Scope of a query's own entity type.
    ///
    /// An unpartitioned entity type always reads the default store.
    pub fn new(ctx: &'a SchemaContext, query: &'a Query) -> Result<Self, Error> {
        let descriptor = ctx.partitions().descriptor(&query.entity, Partition::None)?;
        let partitions = if descriptor.partition_field().is_some() {
            ctx.partitions().partitions(&query.entity, &query.partition)?
        } else {
            vec![Partition::None]
        };
        Ok(Self {
            ctx,
            query,
            descriptor,
            partitions,
        })
    }

    /// Scope of a related entity type reached through a relationship path.
    ///
    /// Nested scopes only evaluate candidate sets, so they cover no
    /// partitions of their own.
    pub fn nested(&self, entity: &str) -> Result<ScanScope<'a>, Error> {
        Ok(Self {
            ctx: self.ctx,
            query: self.query,
            descriptor: self.ctx.partitions().descriptor(entity, Partition::None)?,
            partitions: vec![],
        })
    }

    /// Schema context.
    pub fn context(&self) -> &'a SchemaContext {
        self.ctx
    }

    /// Query being answered.
    pub fn query(&self) -> &'a Query {
        self.query
    }

    /// Descriptor of the scoped entity type.
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// Partitions covered by unrestricted scans.
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Whether the partition selector spans every partition.
    pub fn spans_all_partitions(&self) -> bool {
        self.query.partition == PartitionSelector::All
    }

    /// Whether the query was cancelled.
    pub fn is_terminated(&self) -> bool {
        self.query.is_terminated()
    }

    /// Descriptor of the scoped entity in one partition.
    pub fn descriptor_in(&self, partition: Partition) -> Result<Arc<EntityDescriptor>, Error> {
        self.ctx
            .partitions()
            .descriptor(self.descriptor.name(), partition)
    }

    /// Record store of the scoped entity in one partition.
    pub fn record_store(&self, partition: Partition) -> Result<Arc<dyn RecordStore>, Error> {
        let descriptor = self.descriptor_in(partition)?;
        self.ctx.partitions().record_store(&descriptor)
    }

    /// Run `scan` over every partition in scope and merge the results.
    pub(crate) fn fan_out<F>(&self, scan: F) -> Result<ReferenceSet, Error>
    where
        F: Fn(Partition) -> Result<Vec<Reference>, Error> + Send + Sync,
    {
        if self.is_terminated() {
            return Ok(ReferenceSet::new());
        }
        let per_partition = self.ctx.fan_out(&self.partitions, |partition| {
            if self.is_terminated() {
                return Ok((partition, vec![]));
            }
            let references = scan(partition)?;
            trace!(
                entity = %self.descriptor.name(),
                partition = %partition,
                matched = references.len(),
                "partition scanned"
            );
            Ok((partition, references))
        })?;

        Ok(per_partition
            .into_iter()
            .flat_map(|(partition, references)| {
                references
                    .into_iter()
                    .map(move |r| PartitionReference::new(partition, r))
            })
            .collect())
    }
}

/// Group a candidate set by partition.
pub(crate) fn by_partition(existing: &ReferenceSet) -> BTreeMap<Partition, Vec<Reference>> {
    let mut grouped: BTreeMap<Partition, Vec<Reference>> = BTreeMap::new();
    for at in existing {
        grouped.entry(at.partition()).or_default().push(at.reference);
    }
    grouped
}
