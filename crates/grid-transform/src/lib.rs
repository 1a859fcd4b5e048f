//! Grid-to-record transform.
//!
//! Rows flow through the crate in one direction:
//!
//! ```text
//! GridSpec + VariableBuffers -> GridFlattener -> FlatRow
//!     -> RecordBuilder (fingerprint + normalize + curve) -> StatisticRecord
//! ```

pub mod builder;
pub mod curve;
pub mod error;
pub mod fingerprint;
pub mod flatten;
pub mod normalize;
pub mod pool;
pub mod shape;

pub use builder::{DatasetMeta, DimensionRoles, RecordBuilder};
pub use curve::{simplify, CurveOptions};
pub use error::{Result, TransformError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use flatten::{FlatRow, FlatRows, GridFlattener, NullPolicy};
pub use normalize::{normalize, normalize_tagged};
pub use pool::{BuildPool, ChunkOutput, RowErrorPolicy};
pub use shape::{RecordShape, ScenarioColumn};
