//! Error types for the shared data model.

use thiserror::Error;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

/// Errors raised while parsing the tags that drive the transform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommonError {
    #[error("No matching grid kind: {0}")]
    NoMatchingGridKind(String),

    #[error("No matching unit: {0}")]
    NoMatchingUnit(String),

    #[error("Invalid dataset id: {0}")]
    InvalidDatasetId(String),
}
