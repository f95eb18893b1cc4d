//! Scanner selection.

use tracing::debug;

use super::{
    FullTableScanner, IdentifierScanner, IndexScanner, RelationshipScanner, ScanScope, TableScanner,
};
use crate::catalog::FieldDef;
use crate::error::Error;
use crate::query::filter::CriterionEvaluator;
use onyx_proto::{Criterion, Value};

/// Picks the access path for each criterion node of one scope.
///
/// Priority:
/// 1. a dotted path traverses a relationship
/// 2. a negated leaf needs a full table scan
/// 3. the identifier field with a lookup operator uses the identifier order
/// 4. an indexed field with a lookup operator uses the index
/// 5. any other declared attribute needs a full table scan
///
/// A lookup also needs every literal to convert to the field's type.
pub struct ScannerFactory<'a> {
    scope: ScanScope<'a>,
}

impl<'a> ScannerFactory<'a> {
    /// Create a factory for a scope.
    pub fn new(scope: ScanScope<'a>) -> Self {
        Self { scope }
    }

    /// Scope the scanners are built for.
    pub fn scope(&self) -> &ScanScope<'a> {
        &self.scope
    }

    /// Scanner for one criterion node.
    pub fn create(&self, criterion: &'a Criterion) -> Result<TableScanner<'a>, Error> {
        let descriptor = self.scope.descriptor();
        let attribute = criterion.attribute.as_str();

        let scanner = if criterion.is_relationship_path() {
            TableScanner::Relationship(RelationshipScanner::new(self.scope.clone(), criterion)?)
        } else if criterion.negated {
            self.full_table(criterion)?
        } else if descriptor.is_identifier(attribute) {
            match self.lookup_literals(descriptor.attribute(attribute), criterion) {
                Some(literals) => TableScanner::Identifier(IdentifierScanner::new(
                    self.scope.clone(),
                    criterion,
                    literals,
                )),
                None => self.full_table(criterion)?,
            }
        } else if let Some(field) = descriptor.index(attribute) {
            match self.lookup_literals(Some(field), criterion) {
                Some(literals) => {
                    TableScanner::Index(IndexScanner::new(self.scope.clone(), criterion, literals))
                }
                None => self.full_table(criterion)?,
            }
        } else {
            self.full_table(criterion)?
        };

        debug!(
            entity = %descriptor.name(),
            attribute,
            operator = ?criterion.operator,
            scanner = %scanner.kind(),
            "scanner selected"
        );
        Ok(scanner)
    }

    /// Full table scanner; it takes the whole subtree when every path in it
    /// is local.
    fn full_table(&self, criterion: &'a Criterion) -> Result<TableScanner<'a>, Error> {
        let descriptor = self.scope.descriptor();
        let mut local = true;
        criterion.walk(&mut |c| local &= !c.is_relationship_path());

        if local {
            CriterionEvaluator::new(descriptor).check(criterion)?;
            Ok(TableScanner::FullTable(FullTableScanner::tree(
                self.scope.clone(),
                criterion,
            )))
        } else {
            descriptor.require_attribute(&criterion.attribute)?;
            Ok(TableScanner::FullTable(FullTableScanner::leaf(
                self.scope.clone(),
                criterion,
            )))
        }
    }

    /// Literals converted for a structural lookup, or `None` when the
    /// criterion cannot use one.
    fn lookup_literals(&self, field: Option<&FieldDef>, criterion: &Criterion) -> Option<Vec<Value>> {
        let field = field?;
        if !criterion.operator.is_indexable() {
            return None;
        }
        let literals = criterion.literals();
        if literals.is_empty() {
            return None;
        }
        let scalar = field.field_type.scalar_type();
        literals.into_iter().map(|lit| scalar.coerce(lit)).collect()
    }
}
