//! Error types for the grid transform.

use climate_common::CommonError;
use thiserror::Error;

/// Errors that can occur while flattening a grid or building records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// A variable buffer does not cover the dimension cross product.
    #[error("variable '{variable}' has {actual} samples, expected {expected}")]
    DimensionMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("grid has no dimensions or its cell count overflows")]
    InvalidGrid,

    #[error("variable not found in grid source: {0}")]
    MissingVariable(String),

    #[error("{role} dimension '{name}' is not declared")]
    MissingDimension { role: &'static str, name: String },

    #[error("record shape binds no variables")]
    EmptyShape,

    /// A sample that cannot be normalized (non-finite or out of range).
    #[error("malformed sample {value} for unit {unit}")]
    MalformedSample { value: String, unit: String },

    #[error("coordinate at row {position} is not numeric")]
    NonNumericCoordinate { position: usize },

    #[error("curve at row {position} has {x} x values and {y} y values")]
    CurveLengthMismatch { position: usize, x: usize, y: usize },

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransformError {
    /// Errors that invalidate the whole dataset rather than a single row.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::InvalidGrid
                | Self::MissingVariable(_)
                | Self::MissingDimension { .. }
                | Self::EmptyShape
                | Self::WorkerPool(_)
                | Self::Common(_)
        )
    }
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;
