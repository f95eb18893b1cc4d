//! Per-record criteria evaluation.
//!
//! [`CriterionEvaluator`] answers a criterion against one record's attribute
//! map. The full table scanner uses it to test a whole criteria tree in one
//! pass over the store.

use std::cmp::Ordering;

use crate::catalog::EntityDescriptor;
use crate::error::Error;
use crate::storage::Attributes;
use onyx_proto::{Combinator, Criterion, Operator, Value};

/// Evaluates criteria against the attributes of one entity type.
pub struct CriterionEvaluator<'a> {
    descriptor: &'a EntityDescriptor,
}

impl<'a> CriterionEvaluator<'a> {
    /// Create an evaluator for records of a descriptor's entity type.
    pub fn new(descriptor: &'a EntityDescriptor) -> Self {
        Self { descriptor }
    }

    /// Check that every attribute of a tree is declared and local.
    pub fn check(&self, criterion: &Criterion) -> Result<(), Error> {
        let mut missing = None;
        criterion.walk(&mut |c| {
            if missing.is_none() && self.descriptor.attribute(&c.attribute).is_none() {
                missing = Some(c.attribute.clone());
            }
        });
        match missing {
            Some(attribute) => Err(Error::attribute_missing(self.descriptor.name(), &attribute)),
            None => Ok(()),
        }
    }

    /// Evaluate a whole criteria tree.
    ///
    /// The node's own leaf starts the result; children fold in left to right:
    /// AND keeps the record only if the child matches, OR admits it if the
    /// child matches, NOT drops it if the child matches.
    pub fn matches_tree(&self, criterion: &Criterion, record: &Attributes) -> bool {
        let mut matched = self.matches_leaf(criterion, record);
        for (combinator, child) in &criterion.children {
            matched = match combinator {
                Combinator::And => matched && self.matches_tree(child, record),
                Combinator::Or => matched || self.matches_tree(child, record),
                Combinator::Not => matched && !self.matches_tree(child, record),
            };
        }
        matched
    }

    /// Evaluate a node's own leaf, honoring its negation flag.
    pub fn matches_leaf(&self, criterion: &Criterion, record: &Attributes) -> bool {
        let value = record.get(&criterion.attribute).unwrap_or(&Value::Null);
        let literals: Vec<Value> = criterion
            .literals()
            .into_iter()
            .map(|lit| self.coerce_literal(&criterion.attribute, lit))
            .collect();
        let matched = Self::compare(criterion.operator, value, &literals);
        matched != criterion.negated
    }

    /// Literal converted to the attribute's declared type when possible.
    pub fn coerce_literal(&self, attribute: &str, literal: &Value) -> Value {
        self.descriptor
            .attribute(attribute)
            .and_then(|field| field.field_type.scalar_type().coerce(literal))
            .unwrap_or_else(|| literal.clone())
    }

    /// Apply an operator to a stored value.
    ///
    /// Ordered comparisons never match null or values of another type.
    /// Negative string operators match null and non-string values.
    pub fn compare(operator: Operator, value: &Value, literals: &[Value]) -> bool {
        let literal = literals.first().unwrap_or(&Value::Null);
        match operator {
            Operator::Equal => value.loose_eq(literal),
            Operator::NotEqual => !value.loose_eq(literal),
            Operator::GreaterThan => ordered(value, literal, Ordering::is_gt),
            Operator::GreaterThanEqual => ordered(value, literal, Ordering::is_ge),
            Operator::LessThan => ordered(value, literal, Ordering::is_lt),
            Operator::LessThanEqual => ordered(value, literal, Ordering::is_le),
            Operator::In => literals.iter().any(|l| value.loose_eq(l)),
            Operator::NotIn => !literals.iter().any(|l| value.loose_eq(l)),
            Operator::Contains => strings(value, literal).is_some_and(|(v, l)| v.contains(l)),
            Operator::NotContains => !strings(value, literal).is_some_and(|(v, l)| v.contains(l)),
            Operator::StartsWith => strings(value, literal).is_some_and(|(v, l)| v.starts_with(l)),
            Operator::NotStartsWith => {
                !strings(value, literal).is_some_and(|(v, l)| v.starts_with(l))
            }
            Operator::Like => strings(value, literal).is_some_and(|(v, l)| like_match(v, l)),
            Operator::NotLike => !strings(value, literal).is_some_and(|(v, l)| like_match(v, l)),
            Operator::IsNull => value.is_null(),
            Operator::NotNull => !value.is_null(),
        }
    }
}

fn ordered(value: &Value, literal: &Value, test: fn(Ordering) -> bool) -> bool {
    value.compare(literal).is_some_and(test)
}

fn strings<'v>(value: &'v Value, literal: &'v Value) -> Option<(&'v str, &'v str)> {
    Some((value.as_str()?, literal.as_str()?))
}

/// Match a string against a SQL LIKE pattern.
///
/// Supports:
/// - `%` matches zero or more characters
/// - `_` matches exactly one character
/// - `\%` and `\_` match the literal character
pub fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_from(&value, &pattern)
}

fn like_from(value: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=value.len()).any(|skip| like_from(&value[skip..], rest))
        }
        Some(('_', rest)) => !value.is_empty() && like_from(&value[1..], rest),
        Some(('\\', rest)) if !rest.is_empty() => {
            value.first() == rest.first() && like_from(&value[1..], &rest[1..])
        }
        Some((p, rest)) => value.first() == Some(p) && like_from(&value[1..], rest),
    }
}
