//! Grid lattices, coordinates and raw sample buffers.

use crate::error::CommonError;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Category of source model. Controls fingerprint precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GridKind {
    /// Coarse global circulation model grid
    Gcm,
    /// Regional climate model grid
    Rcm,
}

impl GridKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridKind::Gcm => "GCM",
            GridKind::Rcm => "RCM",
        }
    }
}

impl fmt::Display for GridKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GridKind {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GCM" => Ok(GridKind::Gcm),
            "RCM" => Ok(GridKind::Rcm),
            _ => Err(CommonError::NoMatchingGridKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for GridKind {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GridKind> for String {
    fn from(kind: GridKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A longitude/latitude pair with signed zero removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: unsigned_zero(lon),
            lat: unsigned_zero(lat),
        }
    }
}

/// Coerce `-0.0` to `+0.0`; every other value is returned unchanged.
pub fn unsigned_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

/// A single coordinate value along a dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionValue {
    Number(f64),
    Label(Arc<str>),
}

impl DimensionValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DimensionValue::Number(v) => Some(*v),
            DimensionValue::Label(_) => None,
        }
    }
}

/// The ordered coordinate values of one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum DimensionValues {
    Numbers(Vec<f64>),
    Labels(Vec<Arc<str>>),
}

impl DimensionValues {
    pub fn len(&self) -> usize {
        match self {
            DimensionValues::Numbers(v) => v.len(),
            DimensionValues::Labels(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<DimensionValue> {
        match self {
            DimensionValues::Numbers(v) => v.get(index).copied().map(DimensionValue::Number),
            DimensionValues::Labels(v) => v.get(index).cloned().map(DimensionValue::Label),
        }
    }
}

impl From<Vec<f64>> for DimensionValues {
    fn from(values: Vec<f64>) -> Self {
        DimensionValues::Numbers(values)
    }
}

impl From<Vec<&str>> for DimensionValues {
    fn from(values: Vec<&str>) -> Self {
        DimensionValues::Labels(values.into_iter().map(Arc::from).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    pub values: DimensionValues,
}

impl Dimension {
    pub fn new(name: impl Into<String>, values: impl Into<DimensionValues>) -> Self {
        Self {
            name: name.into(),
            values: values.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered list of dimensions describing a lattice. The first dimension
/// varies slowest when the lattice is flattened.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSpec {
    dimensions: Vec<Dimension>,
}

impl GridSpec {
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|d| d.name.as_str())
    }

    /// Position of the named dimension in declared order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    /// Size of the cartesian product, or `None` if it overflows `usize`.
    pub fn cell_count(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.len()))
    }

    /// Return a copy with the dimensions rearranged into `order`.
    pub fn reordered(&self, order: &[usize]) -> Option<GridSpec> {
        if order.len() != self.dimensions.len() {
            return None;
        }
        let dimensions = order
            .iter()
            .map(|&i| self.dimensions.get(i).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(GridSpec { dimensions })
    }
}

/// How the numbers in a variable buffer are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SampleKind {
    #[default]
    Number,
    /// Elapsed time, stored as a count of `seconds_per_unit`.
    Duration { seconds_per_unit: f64 },
}

/// A raw sample handed to the normalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Number(f64),
    Duration(TimeDelta),
}

/// One declared variable flattened in row-major order. `NaN` marks a missing sample.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBuffer {
    pub name: String,
    pub samples: Vec<f64>,
    pub kind: SampleKind,
}

impl VariableBuffer {
    pub fn new(name: impl Into<String>, samples: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            samples,
            kind: SampleKind::Number,
        }
    }

    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `position`, or `None` when missing or out of range.
    pub fn sample(&self, position: usize) -> Option<RawValue> {
        let v = *self.samples.get(position)?;
        if v.is_nan() {
            return None;
        }
        Some(match self.kind {
            SampleKind::Number => RawValue::Number(v),
            SampleKind::Duration { seconds_per_unit } => duration_sample(v * seconds_per_unit),
        })
    }
}

// Durations outside the representable range come back as a non-finite
// number so the normalizer reports them as malformed.
fn duration_sample(seconds: f64) -> RawValue {
    let millis = (seconds * 1000.0).trunc();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return RawValue::Number(f64::INFINITY);
    }
    match TimeDelta::try_milliseconds(millis as i64) {
        Some(delta) => RawValue::Duration(delta),
        None => RawValue::Number(f64::INFINITY),
    }
}
