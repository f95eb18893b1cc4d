//! Query controller: criteria aggregation, ordering, pagination and the
//! operations built on the matched references.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::scanner::{ScanScope, ScannerFactory};
use super::sort::ReferenceSorter;
use crate::context::SchemaContext;
use crate::entity::{Entity, EntityHandle};
use crate::error::Error;
use crate::persist::{coerce_attribute, Persister};
use crate::reference::{PartitionReference, ReferenceSet, RelationshipReference};
use crate::relationship::{CascadeContext, RelationshipController};
use crate::storage::Attributes;
use onyx_proto::{Combinator, Criterion, Query, Value};

/// Value of one selected path.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// An attribute of the record itself.
    Value(Value),
    /// Values reached through a relationship, one per related record.
    Related(Vec<Value>),
}

impl Projection {
    /// The scalar value, if this is an attribute projection.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Projection::Value(v) => Some(v),
            Projection::Related(_) => None,
        }
    }

    /// The related values, if this is a relationship projection.
    pub fn as_related(&self) -> Option<&[Value]> {
        match self {
            Projection::Value(_) => None,
            Projection::Related(values) => Some(values),
        }
    }

    fn into_values(self) -> Vec<Value> {
        match self {
            Projection::Value(v) => vec![v],
            Projection::Related(values) => values,
        }
    }
}

/// One row of a selection query, keyed by selected path.
pub type SelectionRow = BTreeMap<String, Projection>;

/// Executes one query.
pub struct QueryController<'a> {
    ctx: &'a Arc<SchemaContext>,
    query: &'a Query,
    factory: ScannerFactory<'a>,
}

impl<'a> QueryController<'a> {
    /// Validate a query and resolve its entity type and partitions.
    pub fn new(ctx: &'a Arc<SchemaContext>, query: &'a Query) -> Result<Self, Error> {
        query.validate()?;
        let scope = ScanScope::new(ctx, query)?;
        Ok(Self {
            ctx,
            query,
            factory: ScannerFactory::new(scope),
        })
    }

    fn scope(&self) -> &ScanScope<'a> {
        self.factory.scope()
    }

    /// Every record matching the criteria, in reference order.
    pub fn references(&self) -> Result<ReferenceSet, Error> {
        match &self.query.criterion {
            None => self.scope().fan_out(|partition| self.scope().record_store(partition)?.references()),
            Some(criterion) => self.aggregate(criterion, None),
        }
    }

    /// Matches of a criterion node, optionally restricted to candidates.
    ///
    /// AND children are evaluated within the running result and intersected,
    /// OR children are evaluated over the whole scope and merged, NOT
    /// children are evaluated within the running result and removed.
    fn aggregate(&self, criterion: &'a Criterion, candidates: Option<&ReferenceSet>) -> Result<ReferenceSet, Error> {
        if self.query.is_terminated() {
            return Ok(ReferenceSet::new());
        }
        let scanner = self.factory.create(criterion)?;
        let own = match candidates {
            None => scanner.scan()?,
            Some(existing) => scanner.scan_within(existing)?,
        };
        let mut result = own.references;
        if own.complete {
            return Ok(result);
        }

        for (combinator, child) in &criterion.children {
            if self.query.is_terminated() {
                break;
            }
            match combinator {
                Combinator::And => {
                    let matched = self.aggregate(child, Some(&result))?;
                    result.retain(|r| matched.contains(r));
                }
                Combinator::Or => {
                    let matched = self.aggregate(child, None)?;
                    result.extend(matched);
                }
                Combinator::Not => {
                    let matched = self.aggregate(child, Some(&result))?;
                    result.retain(|r| !matched.contains(r));
                }
            }
        }
        Ok(result)
    }

    /// Matches in the query's ordering.
    pub fn ordered_references(&self) -> Result<Vec<PartitionReference>, Error> {
        let mut references: Vec<PartitionReference> = self.references()?.into_iter().collect();
        if !self.query.order_by.is_empty() {
            let descriptor = self.scope().descriptor();
            ReferenceSorter::new(self.ctx.partitions(), descriptor, &self.query.order_by)?
                .sort(&mut references)?;
        }
        Ok(references)
    }

    /// Ordered matches inside the pagination window.
    pub fn page(&self) -> Result<Vec<PartitionReference>, Error> {
        let mut references = self.ordered_references()?;
        let window = self.query.pagination.window(references.len());
        references.truncate(window.end);
        references.drain(..window.start);
        Ok(references)
    }

    /// Hydrated records of the page, relationships included.
    ///
    /// Records hydrated in one call share instances, so a record reached both
    /// as a result and through a relationship is the same handle.
    #[instrument(skip(self), fields(entity = %self.query.entity))]
    pub fn results(&self) -> Result<Vec<EntityHandle>, Error> {
        let page = self.page()?;
        let persister = Persister::new(self.ctx);
        let mut cascade = CascadeContext::new(self.ctx.config().max_cascade_depth);
        let mut results = Vec::with_capacity(page.len());
        for at in page {
            if self.query.is_terminated() {
                break;
            }
            match persister.load_reference(&self.query.entity, at, &mut cascade)? {
                Some(handle) => results.push(handle),
                None => warn!(reference = %at, "record vanished before hydration; skipped"),
            }
        }
        debug!(results = results.len(), "query hydrated");
        Ok(results)
    }

    /// Projection of the selected paths for every record of the page.
    ///
    /// A plain attribute projects its value; a relationship name projects the
    /// identifiers it links to; a dotted path projects the values reached
    /// through the relationship.
    #[instrument(skip(self), fields(entity = %self.query.entity))]
    pub fn selections(&self) -> Result<Vec<SelectionRow>, Error> {
        let page = self.page()?;
        let mut rows = Vec::with_capacity(page.len());
        for at in page {
            if self.query.is_terminated() {
                break;
            }
            let store = self.scope().record_store(at.partition())?;
            let Some(attributes) = store.get(at.reference)? else {
                warn!(reference = %at, "record vanished before projection; skipped");
                continue;
            };
            let identifier = self.identifier_of(&self.query.entity, &attributes)?;
            let key = RelationshipReference::new(identifier, at.partition());

            let mut row = SelectionRow::new();
            for path in &self.query.selections {
                let projection = self.project(&self.query.entity, &key, &attributes, path)?;
                row.insert(path.clone(), projection);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn identifier_of(&self, entity: &str, attributes: &Attributes) -> Result<Value, Error> {
        let descriptor = self.ctx.catalog().entity(entity)?;
        Ok(attributes
            .get(&descriptor.identity_field)
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn project(
        &self,
        entity: &str,
        key: &RelationshipReference,
        attributes: &Attributes,
        path: &str,
    ) -> Result<Projection, Error> {
        let descriptor = self.ctx.partitions().descriptor(entity, key.partition())?;
        let (head, rest) = match path.split_once(onyx_proto::PATH_SEPARATOR) {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        if rest.is_none() && descriptor.attribute(head).is_some() {
            return Ok(Projection::Value(
                attributes.get(head).cloned().unwrap_or(Value::Null),
            ));
        }

        let def = descriptor.require_relationship(head)?;
        let controller = RelationshipController::new(self.ctx, entity, def)?;
        let members = controller.relationship_identifiers_with_reference(key)?;
        let Some(rest) = rest else {
            return Ok(Projection::Related(
                members.into_iter().map(|m| m.identifier).collect(),
            ));
        };

        let mut values = Vec::with_capacity(members.len());
        for member in members {
            let target = self.ctx.partitions().descriptor(&def.target, member.partition())?;
            let store = self.ctx.partitions().record_store(&target)?;
            let record = match store.reference_for(&member.identifier)? {
                Some(reference) => store.get(reference)?,
                None => None,
            };
            match record {
                Some(related) => {
                    values.extend(self.project(&def.target, &member, &related, rest)?.into_values())
                }
                None => warn!(entity = %def.target, key = %member, "dangling relationship edge skipped"),
            }
        }
        Ok(Projection::Related(values))
    }

    /// Apply the query's update instructions to every record of the page.
    ///
    /// Returns the number of records updated. A change to the partition
    /// field moves the record to the new partition.
    #[instrument(skip(self), fields(entity = %self.query.entity))]
    pub fn update(&self) -> Result<usize, Error> {
        let descriptor = Arc::clone(self.scope().descriptor());
        let mut assignments = Vec::with_capacity(self.query.updates.len());
        for update in &self.query.updates {
            if descriptor.is_identifier(&update.attribute) {
                return Err(Error::AttributeUpdate {
                    entity: descriptor.name().to_string(),
                    attribute: update.attribute.clone(),
                });
            }
            let value = coerce_attribute(&descriptor, &update.attribute, &update.value)?;
            assignments.push((update.attribute.clone(), value));
        }
        if assignments.is_empty() {
            return Ok(0);
        }

        let persister = Persister::new(self.ctx);
        let mut updated = 0;
        for at in self.page()? {
            if self.query.is_terminated() {
                break;
            }
            let store = self.scope().record_store(at.partition())?;
            let Some(attributes) = store.get(at.reference)? else {
                warn!(reference = %at, "record vanished before update; skipped");
                continue;
            };
            let mut entity = Entity::from_record(&self.query.entity, attributes, at);
            for (attribute, value) in &assignments {
                entity.set(attribute.clone(), value.clone());
            }
            let mut cascade = CascadeContext::new(self.ctx.config().max_cascade_depth);
            persister.save(&EntityHandle::new(entity), &mut cascade)?;
            updated += 1;
        }
        debug!(updated, "bulk update applied");
        Ok(updated)
    }

    /// Delete every record of the page, cascading per relationship policy.
    ///
    /// Returns the number of records deleted by the query itself; records
    /// removed only by a cascade are not counted.
    #[instrument(skip(self), fields(entity = %self.query.entity))]
    pub fn delete(&self) -> Result<usize, Error> {
        let persister = Persister::new(self.ctx);
        let mut cascade = CascadeContext::new(self.ctx.config().max_cascade_depth);
        let mut deleted = 0;
        for at in self.page()? {
            if self.query.is_terminated() {
                break;
            }
            let store = self.scope().record_store(at.partition())?;
            let Some(identifier) = store.identifier_for(at.reference)? else {
                continue;
            };
            let key = RelationshipReference::new(identifier, at.partition());
            if persister.delete_key(&self.query.entity, &key, &mut cascade)? {
                deleted += 1;
            }
        }
        debug!(deleted, "bulk delete applied");
        Ok(deleted)
    }

    /// Number of matching records, ignoring pagination.
    ///
    /// A query without criteria sums the store sizes.
    pub fn count(&self) -> Result<u64, Error> {
        if self.query.is_default() {
            let mut total = 0;
            for partition in self.scope().partitions() {
                total += self.scope().record_store(*partition)?.size();
            }
            return Ok(total);
        }
        Ok(self.references()?.len() as u64)
    }
}
