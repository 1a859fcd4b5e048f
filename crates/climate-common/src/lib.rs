//! Common types shared across the climate grid import crates.

pub mod error;
pub mod grid;
pub mod record;
pub mod source;
pub mod unit;

pub use error::{CommonError, CommonResult};
pub use grid::{
    Coordinate, Dimension, DimensionValue, DimensionValues, GridKind, GridSpec, RawValue,
    SampleKind, VariableBuffer,
};
pub use record::{
    normalized_model, scenario_label, DatasetHeader, NormalizedValue, RecordKey, StatisticRecord,
    StatisticValues,
};
pub use source::{GlobalAttributes, GridSource};
pub use unit::Unit;
