//! Climate grid import library.
//!
//! Provides the logic that turns configured grid files into rows of the
//! statistics store.
//!
//! # Architecture
//!
//! This crate is used by the `pfimport` binary and by integration tests. It
//! handles:
//!
//! - Import configuration loading and validation
//! - Grid coordinate loading (fingerprinted lattices per grid kind)
//! - The import pipeline: read, flatten, build in parallel, sync
//! - The sync engine with replace-all and merge-by-key protocols
//! - Progress reporting and cancellation

pub mod config;
pub mod coordinates;
pub mod error;
pub mod importer;
pub mod progress;
pub mod sync;

// Re-exports
pub use config::{
    load_import_config, parse_import_config, DatasetConfig, GridConfig, ImportConfig, SyncConfig,
};
pub use coordinates::{coordinate_rows, CoordinateReport};
pub use error::{ErrorKind, IngestionError, Result};
pub use importer::{
    dataset_header, DatasetFailure, GridSourceReader, ImportOptions, Importer, LoadAllReport,
    NetCdfReader, StaticSources,
};
pub use progress::{LogProgress, NoopProgress, ProgressError, ProgressSink};
pub use sync::{RecordStream, SyncEngine, SyncOptions, SyncProtocol, SyncReport, SyncState};
