//! Query IR validation errors.

use thiserror::Error;

/// Errors raised while building or validating query IR.
#[derive(Debug, Error)]
pub enum Error {
    /// A criterion is structurally invalid.
    #[error("invalid criterion on '{attribute}': {reason}")]
    InvalidCriterion { attribute: String, reason: String },

    /// A query is structurally invalid.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
