//! Lazy expansion of an N-dimensional lattice into row tuples.

use crate::error::{Result, TransformError};
use climate_common::{DimensionValue, GridSpec, RawValue, VariableBuffer};
use serde::{Deserialize, Serialize};

/// Which rows are excluded for missing samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullPolicy {
    /// Drop the row if any bound value is missing.
    #[default]
    Any,
    /// Drop the row only if every bound value is missing.
    All,
}

/// One cell of the lattice: its coordinates in declared dimension order and
/// the samples of each bound variable in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    /// Row-major position in the flattened buffers.
    pub position: usize,
    pub coordinates: Vec<DimensionValue>,
    pub values: Vec<Option<RawValue>>,
}

/// Pairs the cartesian product of a [`GridSpec`] with variable buffers.
///
/// Construction checks every buffer against the product size. Each call to
/// [`GridFlattener::rows`] starts a fresh pass.
#[derive(Debug, Clone)]
pub struct GridFlattener<'a> {
    spec: &'a GridSpec,
    buffers: Vec<&'a VariableBuffer>,
    policy: NullPolicy,
    cells: usize,
}

impl<'a> GridFlattener<'a> {
    pub fn new(
        spec: &'a GridSpec,
        buffers: Vec<&'a VariableBuffer>,
        policy: NullPolicy,
    ) -> Result<Self> {
        if spec.dimensions().is_empty() {
            return Err(TransformError::InvalidGrid);
        }
        let cells = spec.cell_count().ok_or(TransformError::InvalidGrid)?;
        for buffer in &buffers {
            if buffer.len() != cells {
                return Err(TransformError::DimensionMismatch {
                    variable: buffer.name.clone(),
                    expected: cells,
                    actual: buffer.len(),
                });
            }
        }

        Ok(Self {
            spec,
            buffers,
            policy,
            cells,
        })
    }

    /// Number of cells in the lattice, before null filtering.
    pub fn cell_count(&self) -> usize {
        self.cells
    }

    pub fn spec(&self) -> &GridSpec {
        self.spec
    }

    pub fn rows(&self) -> FlatRows<'_, 'a> {
        FlatRows {
            flattener: self,
            position: 0,
            indices: vec![0; self.spec.dimensions().len()],
            dropped: 0,
        }
    }

    fn keep(&self, values: &[Option<RawValue>]) -> bool {
        if values.is_empty() {
            return true;
        }
        match self.policy {
            NullPolicy::Any => values.iter().all(Option::is_some),
            NullPolicy::All => values.iter().any(Option::is_some),
        }
    }
}

/// Iterator over the surviving rows of one pass.
#[derive(Debug)]
pub struct FlatRows<'f, 'a> {
    flattener: &'f GridFlattener<'a>,
    position: usize,
    indices: Vec<usize>,
    dropped: usize,
}

impl FlatRows<'_, '_> {
    /// Rows dropped by the null policy so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    // Odometer step, last dimension fastest.
    fn advance(&mut self) {
        self.position += 1;
        let dims = self.flattener.spec.dimensions();
        for d in (0..self.indices.len()).rev() {
            self.indices[d] += 1;
            if self.indices[d] < dims[d].len() {
                return;
            }
            self.indices[d] = 0;
        }
    }
}

impl Iterator for FlatRows<'_, '_> {
    type Item = FlatRow;

    fn next(&mut self) -> Option<FlatRow> {
        while self.position < self.flattener.cells {
            let position = self.position;
            let values: Vec<Option<RawValue>> = self
                .flattener
                .buffers
                .iter()
                .map(|b| b.sample(position))
                .collect();

            if !self.flattener.keep(&values) {
                self.dropped += 1;
                self.advance();
                continue;
            }

            let coordinates = self
                .flattener
                .spec
                .dimensions()
                .iter()
                .zip(&self.indices)
                .filter_map(|(dim, &i)| dim.values.get(i))
                .collect();
            self.advance();
            return Some(FlatRow {
                position,
                coordinates,
                values,
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.flattener.cells - self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::Dimension;

    fn spec() -> GridSpec {
        GridSpec::new(vec![
            Dimension::new("lon", vec![10.0, 20.0]),
            Dimension::new("lat", vec![-5.0, 0.0, 5.0]),
        ])
    }

    #[test]
    fn test_row_major_order() {
        let spec = spec();
        let buffer = VariableBuffer::new("mean", (0..6).map(f64::from).collect());
        let flattener = GridFlattener::new(&spec, vec![&buffer], NullPolicy::Any).unwrap();
        let rows: Vec<_> = flattener.rows().collect();

        assert_eq!(rows.len(), 6);
        assert_eq!(
            rows[1].coordinates,
            vec![DimensionValue::Number(10.0), DimensionValue::Number(0.0)]
        );
        assert_eq!(
            rows[3].coordinates,
            vec![DimensionValue::Number(20.0), DimensionValue::Number(-5.0)]
        );
        assert_eq!(rows[3].values, vec![Some(RawValue::Number(3.0))]);
    }

    #[test]
    fn test_length_mismatch() {
        let spec = spec();
        let buffer = VariableBuffer::new("mean", vec![1.0; 5]);
        let err = GridFlattener::new(&spec, vec![&buffer], NullPolicy::Any).unwrap_err();
        assert_eq!(
            err,
            TransformError::DimensionMismatch {
                variable: "mean".to_string(),
                expected: 6,
                actual: 5,
            }
        );
    }

    #[test]
    fn test_null_policies() {
        let spec = spec();
        let a = VariableBuffer::new("a", vec![1.0, f64::NAN, f64::NAN, 4.0, 5.0, 6.0]);
        let b = VariableBuffer::new("b", vec![1.0, 2.0, f64::NAN, f64::NAN, 5.0, 6.0]);

        let any = GridFlattener::new(&spec, vec![&a, &b], NullPolicy::Any).unwrap();
        let mut rows = any.rows();
        assert_eq!(rows.by_ref().count(), 3);
        assert_eq!(rows.dropped(), 3);

        let all = GridFlattener::new(&spec, vec![&a, &b], NullPolicy::All).unwrap();
        let rows: Vec<_> = all.rows().collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[1].values, vec![None, Some(RawValue::Number(2.0))]);
    }

    #[test]
    fn test_restartable() {
        let spec = spec();
        let buffer = VariableBuffer::new("mean", vec![1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0]);
        let flattener = GridFlattener::new(&spec, vec![&buffer], NullPolicy::Any).unwrap();
        let first: Vec<_> = flattener.rows().collect();
        let second: Vec<_> = flattener.rows().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }
}
