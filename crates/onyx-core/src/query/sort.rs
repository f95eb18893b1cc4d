//! Ordering of matched references.
//!
//! Only the ordered attributes are read, one at a time and only when a
//! comparison needs them; each value is memoized per reference.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::EntityDescriptor;
use crate::error::Error;
use crate::partition::Partition;
use crate::partition::PartitionContext;
use crate::reference::PartitionReference;
use crate::storage::RecordStore;
use onyx_proto::{OrderSpec, Value};

/// Sorts references of one entity type by a list of attribute orderings.
pub struct ReferenceSorter<'a> {
    partitions: &'a PartitionContext,
    descriptor: &'a EntityDescriptor,
    order: &'a [OrderSpec],
}

impl<'a> ReferenceSorter<'a> {
    /// Create a sorter; every ordered attribute must be declared.
    pub fn new(
        partitions: &'a PartitionContext,
        descriptor: &'a EntityDescriptor,
        order: &'a [OrderSpec],
    ) -> Result<Self, Error> {
        for spec in order {
            descriptor.require_attribute(&spec.attribute)?;
        }
        Ok(Self {
            partitions,
            descriptor,
            order,
        })
    }

    /// Sort references in place.
    ///
    /// Records tied on every attribute keep reference order. A record that
    /// disappeared reads as null.
    pub fn sort(&self, references: &mut [PartitionReference]) -> Result<(), Error> {
        if self.order.is_empty() || references.len() < 2 {
            return Ok(());
        }

        let mut memo = AttributeMemo::new(self.partitions, self.descriptor, self.order.len());
        let mut failure = None;
        references.sort_by(|a, b| {
            if failure.is_some() {
                return a.cmp(b);
            }
            for (i, spec) in self.order.iter().enumerate() {
                let ordering = match memo.compare(i, &spec.attribute, a, b) {
                    Ok(ordering) => ordering,
                    Err(err) => {
                        failure = Some(err);
                        return a.cmp(b);
                    }
                };
                let ordering = if spec.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            a.cmp(b)
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Per-attribute caches of fetched values, keyed by reference.
struct AttributeMemo<'a> {
    partitions: &'a PartitionContext,
    descriptor: &'a EntityDescriptor,
    values: Vec<HashMap<PartitionReference, Value>>,
    stores: HashMap<Partition, Arc<dyn RecordStore>>,
}

impl<'a> AttributeMemo<'a> {
    fn new(partitions: &'a PartitionContext, descriptor: &'a EntityDescriptor, attributes: usize) -> Self {
        Self {
            partitions,
            descriptor,
            values: vec![HashMap::new(); attributes],
            stores: HashMap::new(),
        }
    }

    fn compare(
        &mut self,
        slot: usize,
        attribute: &str,
        a: &PartitionReference,
        b: &PartitionReference,
    ) -> Result<Ordering, Error> {
        let left = self.value(slot, attribute, a)?;
        let right = self.value(slot, attribute, b)?;
        Ok(left.total_cmp(&right))
    }

    fn value(&mut self, slot: usize, attribute: &str, at: &PartitionReference) -> Result<Value, Error> {
        if let Some(value) = self.values[slot].get(at) {
            return Ok(value.clone());
        }
        let store = self.store(at.partition())?;
        let value = store
            .get_attribute(at.reference, attribute)?
            .unwrap_or(Value::Null);
        self.values[slot].insert(*at, value.clone());
        Ok(value)
    }

    fn store(&mut self, partition: Partition) -> Result<Arc<dyn RecordStore>, Error> {
        if let Some(store) = self.stores.get(&partition) {
            return Ok(Arc::clone(store));
        }
        let descriptor = self
            .partitions
            .descriptor(self.descriptor.name(), partition)?;
        let store = self.partitions.record_store(&descriptor)?;
        self.stores.insert(partition, Arc::clone(&store));
        Ok(store)
    }
}
