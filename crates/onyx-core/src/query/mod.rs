//! Query execution.
//!
//! A [`QueryController`] turns a [`Query`](onyx_proto::Query) into matched
//! references by asking the [`ScannerFactory`] for an access path per
//! criterion node and folding the children in. Matches are then ordered,
//! paginated and hydrated, projected, updated, deleted or counted.

pub mod controller;
pub mod filter;
pub mod scanner;
pub mod sort;

pub use controller::{Projection, QueryController, SelectionRow};
pub use filter::{like_match, CriterionEvaluator};
pub use scanner::{ScanResult, ScanScope, ScannerFactory, ScannerKind, TableScanner};
pub use sort::ReferenceSorter;
