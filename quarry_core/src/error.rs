use crate::types::QueryId;
use thiserror::Error;

/// Failures raised while binding values into a [`crate::ParameterizedQuery`].
///
/// Both variants are local to the request: they are surfaced to the caller
/// as-is and never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Invalid value for parameter \"{name}\": {reason}")]
    Invalid { name: String, reason: String },

    #[error("Query {query_id} is not attached to a data source")]
    Detached { query_id: QueryId },
}

impl ParameterError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ParameterError::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
