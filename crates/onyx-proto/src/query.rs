//! Query IR types: criteria trees, ordering, pagination and update instructions.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Separator between segments of a relationship attribute path.
pub const PATH_SEPARATOR: char = '.';

/// Comparison operator of a criterion leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equal to.
    Equal,
    /// Not equal to.
    NotEqual,
    /// Greater than.
    GreaterThan,
    /// Greater than or equal to.
    GreaterThanEqual,
    /// Less than.
    LessThan,
    /// Less than or equal to.
    LessThanEqual,
    /// Member of the criterion's value list.
    In,
    /// Not a member of the criterion's value list.
    NotIn,
    /// String contains substring.
    Contains,
    /// String does not contain substring.
    NotContains,
    /// String starts with prefix.
    StartsWith,
    /// String does not start with prefix.
    NotStartsWith,
    /// SQL LIKE pattern (`%` any run, `_` one character).
    Like,
    /// Negated LIKE pattern.
    NotLike,
    /// Attribute is null.
    IsNull,
    /// Attribute is not null.
    NotNull,
}

impl Operator {
    /// Whether the operator can be answered by an identifier or index lookup.
    ///
    /// Every other operator needs a per-record comparison.
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::In
                | Operator::GreaterThan
                | Operator::GreaterThanEqual
                | Operator::LessThan
                | Operator::LessThanEqual
        )
    }

    /// Whether the operator compares against a list of values.
    pub fn takes_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Whether the operator ignores the literal value.
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::NotNull)
    }
}

/// How a child criterion combines with the running result of its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Combinator {
    /// Keep only records matching both.
    And,
    /// Add records matching the child.
    Or,
    /// Remove records matching the child.
    Not,
}

/// A node of the boolean criteria tree.
///
/// The node's own leaf (`attribute operator value`) produces the starting
/// result; children are then folded into it left to right according to their
/// combinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Attribute path; dotted paths traverse relationships.
    pub attribute: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Literal value for scalar operators.
    pub value: Value,
    /// Literal values for `In` / `NotIn`.
    #[serde(default)]
    pub values: Vec<Value>,
    /// Inverts the node's own leaf match.
    #[serde(default)]
    pub negated: bool,
    /// Child criteria in evaluation order.
    #[serde(default)]
    pub children: Vec<(Combinator, Criterion)>,
}

impl Criterion {
    /// Create a leaf criterion.
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
            values: vec![],
            negated: false,
            children: vec![],
        }
    }

    /// Create an equality criterion.
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Operator::Equal, value)
    }

    /// Create a not-equal criterion.
    pub fn ne(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Operator::NotEqual, value)
    }

    /// Create a greater-than criterion.
    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Operator::GreaterThan, value)
    }

    /// Create a greater-than-or-equal criterion.
    pub fn ge(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Operator::GreaterThanEqual, value)
    }

    /// Create a less-than criterion.
    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Operator::LessThan, value)
    }

    /// Create a less-than-or-equal criterion.
    pub fn le(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, Operator::LessThanEqual, value)
    }

    /// Create an IN criterion.
    pub fn in_list(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        let mut criterion = Self::new(attribute, Operator::In, Value::Null);
        criterion.values = values;
        criterion
    }

    /// Create a NOT IN criterion.
    pub fn not_in(attribute: impl Into<String>, values: Vec<Value>) -> Self {
        let mut criterion = Self::new(attribute, Operator::NotIn, Value::Null);
        criterion.values = values;
        criterion
    }

    /// Create a substring criterion.
    pub fn contains(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(attribute, Operator::Contains, Value::String(value.into()))
    }

    /// Create a prefix criterion.
    pub fn starts_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(attribute, Operator::StartsWith, Value::String(value.into()))
    }

    /// Create a LIKE criterion.
    pub fn like(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(attribute, Operator::Like, Value::String(pattern.into()))
    }

    /// Create an IS NULL criterion.
    pub fn is_null(attribute: impl Into<String>) -> Self {
        Self::new(attribute, Operator::IsNull, Value::Null)
    }

    /// Create a NOT NULL criterion.
    pub fn not_null(attribute: impl Into<String>) -> Self {
        Self::new(attribute, Operator::NotNull, Value::Null)
    }

    /// Append a child that must also match.
    pub fn and(mut self, child: Criterion) -> Self {
        self.children.push((Combinator::And, child));
        self
    }

    /// Append a child whose matches are added to the result.
    pub fn or(mut self, child: Criterion) -> Self {
        self.children.push((Combinator::Or, child));
        self
    }

    /// Append a child whose matches are removed from the result.
    pub fn and_not(mut self, child: Criterion) -> Self {
        self.children.push((Combinator::Not, child));
        self
    }

    /// Invert this node's own leaf.
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Whether this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the attribute path traverses a relationship.
    pub fn is_relationship_path(&self) -> bool {
        self.attribute.contains(PATH_SEPARATOR)
    }

    /// Split a dotted path into the first relationship segment and the rest.
    pub fn split_path(&self) -> Option<(&str, &str)> {
        self.attribute.split_once(PATH_SEPARATOR)
    }

    /// Copy of this node's leaf with a different attribute and no children.
    pub fn leaf_with_attribute(&self, attribute: impl Into<String>) -> Criterion {
        Criterion {
            attribute: attribute.into(),
            operator: self.operator,
            value: self.value.clone(),
            values: self.values.clone(),
            negated: self.negated,
            children: vec![],
        }
    }

    /// Copy of this node's leaf without children.
    pub fn leaf(&self) -> Criterion {
        self.leaf_with_attribute(self.attribute.clone())
    }

    /// Visit this node and every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Criterion)) {
        visit(self);
        for (_, child) in &self.children {
            child.walk(visit);
        }
    }

    /// Every attribute path referenced by the tree.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |c| out.push(c.attribute.as_str()));
        out
    }

    /// Check the tree for structural problems.
    pub fn validate(&self) -> Result<(), Error> {
        let mut problem = None;
        self.walk(&mut |c| {
            if problem.is_some() {
                return;
            }
            if c.attribute.is_empty() || c.attribute.split(PATH_SEPARATOR).any(str::is_empty) {
                problem = Some(Error::InvalidCriterion {
                    attribute: c.attribute.clone(),
                    reason: "empty attribute path segment".into(),
                });
            } else if c.operator.takes_list() && !c.value.is_null() && !c.values.is_empty() {
                problem = Some(Error::InvalidCriterion {
                    attribute: c.attribute.clone(),
                    reason: "list operator given both a scalar and a list".into(),
                });
            } else if matches!(
                c.operator,
                Operator::Contains
                    | Operator::NotContains
                    | Operator::StartsWith
                    | Operator::NotStartsWith
                    | Operator::Like
                    | Operator::NotLike
            ) && c.value.as_str().is_none()
            {
                problem = Some(Error::InvalidCriterion {
                    attribute: c.attribute.clone(),
                    reason: format!("{:?} requires a string literal", c.operator),
                });
            }
        });
        match problem {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Literal values this node compares against.
    ///
    /// List operators use `values`; a list operator given a scalar treats it
    /// as a one-element list.
    pub fn literals(&self) -> Vec<&Value> {
        if self.operator.takes_list() {
            if self.values.is_empty() && !self.value.is_null() {
                vec![&self.value]
            } else {
                self.values.iter().collect()
            }
        } else {
            vec![&self.value]
        }
    }
}

/// Which partitions a query reads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum PartitionSelector {
    /// The default, unpartitioned store.
    #[default]
    None,
    /// The partition holding this partition-field value.
    Value(Value),
    /// Every registered partition.
    All,
}

/// Ordering on one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Attribute to order by.
    pub attribute: String,
    /// Ascending when true.
    pub ascending: bool,
}

impl OrderSpec {
    /// Ascending order on an attribute.
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    /// Descending order on an attribute.
    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }
}

/// Offset and count applied to a query's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Number of rows to skip.
    pub first_row: usize,
    /// Maximum number of rows; zero means unbounded.
    pub max_results: usize,
}

impl Pagination {
    /// Create a pagination window.
    pub fn new(first_row: usize, max_results: usize) -> Self {
        Self {
            first_row,
            max_results,
        }
    }

    /// Limit the number of rows without an offset.
    pub fn limit(max_results: usize) -> Self {
        Self::new(0, max_results)
    }

    /// Index range of the window over a result of `len` rows.
    ///
    /// A zero or oversized `max_results` runs from the offset to the end.
    pub fn window(&self, len: usize) -> Range<usize> {
        let start = self.first_row.min(len);
        let end = if self.max_results == 0 {
            len
        } else {
            start.saturating_add(self.max_results).min(len)
        };
        start..end
    }

    /// Whether the window covers every row.
    pub fn is_unbounded(&self) -> bool {
        self.first_row == 0 && self.max_results == 0
    }
}

/// Assignment applied to every record matched by an update query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInstruction {
    /// Attribute to assign.
    pub attribute: String,
    /// New value.
    pub value: Value,
}

impl UpdateInstruction {
    /// Create an update instruction.
    pub fn new(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// A query against one entity type.
///
/// Clones share the termination flag, so terminating any clone cancels all
/// of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Entity type to query.
    pub entity: String,
    /// Root of the criteria tree; `None` matches every record.
    pub criterion: Option<Criterion>,
    /// Partition scope.
    #[serde(default)]
    pub partition: PartitionSelector,
    /// Ordering, most significant first.
    #[serde(default)]
    pub order_by: Vec<OrderSpec>,
    /// Result window.
    #[serde(default)]
    pub pagination: Pagination,
    /// Assignments for update queries.
    #[serde(default)]
    pub updates: Vec<UpdateInstruction>,
    /// Attributes to project for selection queries.
    #[serde(default)]
    pub selections: Vec<String>,
    #[serde(skip)]
    terminated: Arc<AtomicBool>,
}

impl Query {
    /// Create a query matching every record of an entity type.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            criterion: None,
            partition: PartitionSelector::None,
            order_by: vec![],
            pagination: Pagination::default(),
            updates: vec![],
            selections: vec![],
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the root criterion.
    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = Some(criterion);
        self
    }

    /// Set the partition scope.
    pub fn with_partition(mut self, partition: PartitionSelector) -> Self {
        self.partition = partition;
        self
    }

    /// Scope the query to the partition holding `value`.
    pub fn in_partition(self, value: impl Into<Value>) -> Self {
        self.with_partition(PartitionSelector::Value(value.into()))
    }

    /// Scope the query to every partition.
    pub fn across_partitions(self) -> Self {
        self.with_partition(PartitionSelector::All)
    }

    /// Add an ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the result window.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Add an update instruction.
    pub fn with_update(mut self, update: UpdateInstruction) -> Self {
        self.updates.push(update);
        self
    }

    /// Set the projected attributes.
    pub fn with_selections<I, S>(mut self, selections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections = selections.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the query has no criterion and so matches everything.
    pub fn is_default(&self) -> bool {
        self.criterion.is_none()
    }

    /// Request cooperative cancellation.
    pub fn terminate(&self) {
        self.terminated.store(true, AtomicOrdering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(AtomicOrdering::Acquire)
    }

    /// Handle that can cancel this query from another thread.
    pub fn termination_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }

    /// Check the query for structural problems.
    pub fn validate(&self) -> Result<(), Error> {
        if self.entity.is_empty() {
            return Err(Error::InvalidQuery("entity type is empty".into()));
        }
        if let Some(criterion) = &self.criterion {
            criterion.validate()?;
        }
        if let Some(update) = self.updates.iter().find(|u| u.attribute.is_empty()) {
            return Err(Error::InvalidQuery(format!(
                "update instruction has an empty attribute (value {})",
                update.value
            )));
        }
        if let Some(order) = self.order_by.iter().find(|o| o.attribute.is_empty()) {
            return Err(Error::InvalidQuery(format!(
                "ordering has an empty attribute (ascending: {})",
                order.ascending
            )));
        }
        Ok(())
    }
}
