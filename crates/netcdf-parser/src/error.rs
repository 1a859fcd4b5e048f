//! Error types for NetCDF grid reading.

use thiserror::Error;

/// Result type for NetCDF parser operations.
pub type NetCdfResult<T> = Result<T, NetCdfError>;

/// Error types for NetCDF parsing.
#[derive(Error, Debug)]
pub enum NetCdfError {
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is missing or is not a readable NetCDF file
    #[error("Failed to open {path}: {message}")]
    OpenFailed { path: String, message: String },

    /// Missing required dimension, variable or attribute
    #[error("Missing required data: {0}")]
    MissingData(String),

    /// A variable is laid out over different dimensions than declared
    #[error("Variable '{variable}' has dimensions {actual:?}, expected {expected:?}")]
    DimensionOrder {
        variable: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}
