//! Error types for the ingestion crate.

use climate_common::CommonError;
use grid_transform::TransformError;
use netcdf_parser::NetCdfError;
use storage::StoreError;
use thiserror::Error;

use crate::sync::SyncProtocol;

/// Errors that can occur while importing a dataset.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown dataset id: {0}")]
    UnknownDataset(i64),

    #[error("Failed to read grid source: {0}")]
    Source(#[from] NetCdfError),

    #[error("Failed to build records: {0}")]
    Transform(#[from] TransformError),

    #[error("{0}")]
    Common(#[from] CommonError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dataset {dataset_id}: batch {batch} failed after {attempts} attempt(s): {source}")]
    BatchFailed {
        dataset_id: i32,
        protocol: SyncProtocol,
        batch: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Dataset {dataset_id}: import cancelled before batch {next_batch}")]
    Cancelled {
        dataset_id: i32,
        protocol: SyncProtocol,
        next_batch: usize,
    },

    #[error("Pipeline worker failed: {0}")]
    Worker(String),
}

/// Where an error sits in the failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any write; nothing was changed.
    Configuration,
    /// A row or file could not be transformed.
    Transform,
    /// The store rejected a write; only the current transaction is lost.
    Synchronization,
    Cancelled,
}

impl IngestionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestionError::InvalidConfig(_)
            | IngestionError::UnknownDataset(_)
            | IngestionError::Source(_)
            | IngestionError::Common(_) => ErrorKind::Configuration,
            IngestionError::Transform(e) if e.is_configuration() => ErrorKind::Configuration,
            IngestionError::Transform(_) | IngestionError::Worker(_) => ErrorKind::Transform,
            IngestionError::Store(_) | IngestionError::BatchFailed { .. } => {
                ErrorKind::Synchronization
            }
            IngestionError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// The batch to pass as `resume_from_batch` after a merge-by-key failure.
    /// Replace-all failures have none; the dataset is redone from scratch.
    pub fn resume_batch(&self) -> Option<usize> {
        match self {
            IngestionError::BatchFailed {
                protocol: SyncProtocol::MergeByKey,
                batch,
                ..
            } => Some(*batch),
            IngestionError::Cancelled {
                protocol: SyncProtocol::MergeByKey,
                next_batch,
                ..
            } => Some(*next_batch),
            _ => None,
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
