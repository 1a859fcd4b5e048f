//! Turns flattened rows into statistic records.

use crate::curve::simplify;
use crate::error::{Result, TransformError};
use crate::fingerprint::fingerprint;
use crate::flatten::FlatRow;
use crate::normalize::{normalize, round_decimal};
use crate::shape::RecordShape;
use climate_common::{
    scenario_label, GridKind, GridSpec, NormalizedValue, RawValue, StatisticRecord,
    StatisticValues, Unit,
};
use serde::{Deserialize, Serialize};

/// Names of the dimensions that carry longitude, latitude and scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRoles {
    #[serde(default = "default_longitude")]
    pub longitude: String,
    #[serde(default = "default_latitude")]
    pub latitude: String,
    #[serde(default = "default_scenario")]
    pub scenario: String,
}

fn default_longitude() -> String {
    "lon".to_string()
}

fn default_latitude() -> String {
    "lat".to_string()
}

fn default_scenario() -> String {
    "warming_levels".to_string()
}

impl Default for DimensionRoles {
    fn default() -> Self {
        Self {
            longitude: default_longitude(),
            latitude: default_latitude(),
            scenario: default_scenario(),
        }
    }
}

/// Per-dataset facts the builder needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMeta {
    pub dataset_id: i32,
    pub grid: GridKind,
    pub unit: Unit,
    pub shape: RecordShape,
    pub roles: DimensionRoles,
}

/// Builds the records of one dataset. Dimension roles are resolved once
/// against the grid; `build` is pure and safe to share across threads.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    meta: DatasetMeta,
    lon: usize,
    lat: usize,
    scenario: Option<usize>,
}

impl RecordBuilder {
    pub fn new(meta: DatasetMeta, spec: &GridSpec) -> Result<Self> {
        if meta.shape.variables().is_empty() {
            return Err(TransformError::EmptyShape);
        }
        let resolve = |role: &'static str, name: &str| {
            spec.position(name)
                .ok_or_else(|| TransformError::MissingDimension {
                    role,
                    name: name.to_string(),
                })
        };
        let lon = resolve("longitude", &meta.roles.longitude)?;
        let lat = resolve("latitude", &meta.roles.latitude)?;
        let scenario = if meta.shape.uses_scenario_dimension() {
            Some(resolve("scenario", &meta.roles.scenario)?)
        } else {
            None
        };

        Ok(Self {
            meta,
            lon,
            lat,
            scenario,
        })
    }

    pub fn meta(&self) -> &DatasetMeta {
        &self.meta
    }

    /// Variables to flatten, in the order `build` expects them.
    pub fn variables(&self) -> Vec<&str> {
        self.meta.shape.variables()
    }

    pub fn build(&self, row: &FlatRow) -> Result<Vec<StatisticRecord>> {
        let coordinate = |index: usize| {
            row.coordinates
                .get(index)
                .and_then(|c| c.as_f64())
                .ok_or(TransformError::NonNumericCoordinate {
                    position: row.position,
                })
        };
        let hash = fingerprint(self.meta.grid, coordinate(self.lon)?, coordinate(self.lat)?).hash;

        let record = |warming_scenario: String, values: StatisticValues| StatisticRecord {
            dataset_id: self.meta.dataset_id,
            coordinate_hash: hash.clone(),
            warming_scenario,
            values,
        };

        if let RecordShape::ScenarioColumns { columns } = &self.meta.shape {
            let mut records = Vec::with_capacity(columns.len());
            for (column, value) in columns.iter().zip(&row.values) {
                if let Some(raw) = value {
                    let values = StatisticValues::MeanPercentiles {
                        mean: Some(self.normalize(*raw)?),
                        pctl10: None,
                        pctl90: None,
                    };
                    records.push(record(column.label.clone(), values));
                }
            }
            return Ok(records);
        }

        let label = self
            .scenario
            .and_then(|i| row.coordinates.get(i))
            .map(scenario_label)
            .unwrap_or_default();
        let values = self.values(row)?;
        Ok(vec![record(label, values)])
    }

    fn values(&self, row: &FlatRow) -> Result<StatisticValues> {
        let mut samples = row.values.iter().copied();
        let mut next = || -> Result<Option<NormalizedValue>> {
            samples
                .next()
                .flatten()
                .map(|raw| self.normalize(raw))
                .transpose()
        };

        Ok(match &self.meta.shape {
            RecordShape::MeanPercentiles { pctl10, pctl90, .. } => {
                let mean = next()?;
                let pctl10 = if pctl10.is_some() { next()? } else { None };
                let pctl90 = if pctl90.is_some() { next()? } else { None };
                StatisticValues::MeanPercentiles {
                    mean,
                    pctl10,
                    pctl90,
                }
            }
            RecordShape::LowMidHigh { .. } => StatisticValues::LowMidHigh {
                low: next()?,
                mid: next()?,
                high: next()?,
            },
            // Positions are meaningful; a missing sample stays a null slot.
            RecordShape::Ladder { .. } => StatisticValues::Ladder {
                values: row
                    .values
                    .iter()
                    .copied()
                    .map(|sample| sample.map(|raw| self.normalize(raw)).transpose())
                    .collect::<Result<_>>()?,
            },
            RecordShape::Curve { x, options, .. } => {
                let (x_raw, y_raw) = row.values.split_at(x.len().min(row.values.len()));
                if x_raw.len() != y_raw.len() {
                    return Err(TransformError::CurveLengthMismatch {
                        position: row.position,
                        x: x_raw.len(),
                        y: y_raw.len(),
                    });
                }
                // A point needs both halves.
                let (xs, ys): (Vec<f64>, Vec<f64>) = x_raw
                    .iter()
                    .zip(y_raw)
                    .filter_map(|(x, y)| Some((as_f64(x.as_ref()?), as_f64(y.as_ref()?))))
                    .unzip();
                let (xs, ys) = simplify(&xs, &ys, options);
                StatisticValues::Curve {
                    x: xs
                        .into_iter()
                        .map(|v| self.normalize(RawValue::Number(v)))
                        .collect::<Result<_>>()?,
                    y: ys
                        .into_iter()
                        .map(|v| NormalizedValue::Decimal(round_decimal(v, 1)))
                        .collect(),
                }
            }
            RecordShape::ScenarioColumns { .. } => StatisticValues::MeanPercentiles {
                mean: next()?,
                pctl10: None,
                pctl90: None,
            },
        })
    }

    fn normalize(&self, raw: RawValue) -> Result<NormalizedValue> {
        normalize(raw, self.meta.unit)
    }
}

fn as_f64(raw: &RawValue) -> f64 {
    match raw {
        RawValue::Number(v) => *v,
        RawValue::Duration(d) => d.num_seconds() as f64 / 86_400.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveOptions;
    use crate::shape::ScenarioColumn;
    use climate_common::{Dimension, DimensionValue};

    fn spec() -> GridSpec {
        GridSpec::new(vec![
            Dimension::new("lon", vec![-0.0, 1.0]),
            Dimension::new("lat", vec![0.0]),
            Dimension::new("warming_levels", vec![1.5, 2.0]),
        ])
    }

    fn meta(shape: RecordShape) -> DatasetMeta {
        DatasetMeta {
            dataset_id: 40101,
            grid: GridKind::Gcm,
            unit: Unit::DegreesCelsius,
            shape,
            roles: DimensionRoles::default(),
        }
    }

    fn row(values: Vec<Option<f64>>) -> FlatRow {
        FlatRow {
            position: 0,
            coordinates: vec![
                DimensionValue::Number(-0.0),
                DimensionValue::Number(0.0),
                DimensionValue::Number(2.0),
            ],
            values: values.into_iter().map(|v| v.map(RawValue::Number)).collect(),
        }
    }

    #[test]
    fn test_mean_percentiles() {
        let shape = RecordShape::MeanPercentiles {
            mean: "mean".into(),
            pctl10: Some("pctl10".into()),
            pctl90: Some("pctl90".into()),
        };
        let builder = RecordBuilder::new(meta(shape), &spec()).unwrap();
        let records = builder.build(&row(vec![Some(21.04), Some(19.96), Some(23.0)])).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.warming_scenario, "2.0");
        assert_eq!(record.coordinate_hash, "a1a506944a66621810402e0e17cfc6e8");
        assert_eq!(
            record.values,
            StatisticValues::MeanPercentiles {
                mean: Some(NormalizedValue::Decimal("21.0".into())),
                pctl10: Some(NormalizedValue::Decimal("20.0".into())),
                pctl90: Some(NormalizedValue::Decimal("23.0".into())),
            }
        );
    }

    #[test]
    fn test_missing_dimension() {
        let mut meta = meta(RecordShape::Ladder {
            values: vec!["a".into()],
        });
        meta.roles.scenario = "time".into();
        let err = RecordBuilder::new(meta, &spec()).unwrap_err();
        assert_eq!(
            err,
            TransformError::MissingDimension {
                role: "scenario",
                name: "time".into()
            }
        );
    }

    #[test]
    fn test_curve_is_simplified() {
        let shape = RecordShape::Curve {
            x: vec!["x0".into(), "x1".into(), "x2".into(), "x3".into()],
            y: vec!["y0".into(), "y1".into(), "y2".into(), "y3".into()],
            options: CurveOptions::default(),
        };
        let mut meta = meta(shape);
        meta.unit = Unit::Days;
        let builder = RecordBuilder::new(meta, &spec()).unwrap();
        let records = builder
            .build(&row(vec![
                Some(0.0),
                Some(0.0),
                Some(0.0),
                Some(1.0),
                Some(100.0),
                Some(0.0),
                Some(0.0),
                Some(0.0),
            ]))
            .unwrap();

        assert_eq!(
            records[0].values,
            StatisticValues::Curve {
                x: vec![NormalizedValue::Integer(0), NormalizedValue::Integer(1)],
                y: vec![
                    NormalizedValue::Decimal("100.0".into()),
                    NormalizedValue::Decimal("0.0".into())
                ],
            }
        );
    }

    #[test]
    fn test_curve_length_mismatch() {
        let shape = RecordShape::Curve {
            x: vec!["x0".into(), "x1".into()],
            y: vec!["y0".into(), "y1".into()],
            options: CurveOptions::default(),
        };
        let builder = RecordBuilder::new(meta(shape), &spec()).unwrap();
        let err = builder
            .build(&row(vec![Some(1.0), Some(2.0), Some(3.0)]))
            .unwrap_err();
        assert!(matches!(err, TransformError::CurveLengthMismatch { x: 2, y: 1, .. }));
    }

    #[test]
    fn test_curve_pairs_before_dropping_missing() {
        let shape = RecordShape::Curve {
            x: vec!["x0".into(), "x1".into(), "x2".into()],
            y: vec!["y0".into(), "y1".into(), "y2".into()],
            options: CurveOptions::default(),
        };
        let mut meta = meta(shape);
        meta.unit = Unit::Days;
        let builder = RecordBuilder::new(meta, &spec()).unwrap();
        let records = builder
            .build(&row(vec![
                Some(1.0),
                None,
                Some(3.0),
                Some(10.0),
                Some(20.0),
                None,
            ]))
            .unwrap();
        assert_eq!(
            records[0].values,
            StatisticValues::Curve {
                x: vec![NormalizedValue::Integer(1)],
                y: vec![NormalizedValue::Decimal("10.0".into())],
            }
        );
    }

    #[test]
    fn test_scenario_columns() {
        let shape = RecordShape::ScenarioColumns {
            columns: vec![
                ScenarioColumn {
                    label: "0.5".into(),
                    variable: "deg_baseline".into(),
                },
                ScenarioColumn {
                    label: "1.0".into(),
                    variable: "deg_1".into(),
                },
            ],
        };
        let mut meta = meta(shape);
        meta.roles.scenario = "not_used".into();
        let builder = RecordBuilder::new(meta, &spec()).unwrap();
        let records = builder.build(&row(vec![Some(3.0), None])).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].warming_scenario, "0.5");
    }

    #[test]
    fn test_ladder_keeps_missing_positions() {
        let shape = RecordShape::Ladder {
            values: vec!["a".into(), "b".into(), "c".into()],
        };
        let mut meta = meta(shape);
        meta.unit = Unit::Raw;
        let builder = RecordBuilder::new(meta, &spec()).unwrap();
        let records = builder.build(&row(vec![Some(1.9), None, Some(3.2)])).unwrap();
        assert_eq!(
            records[0].values,
            StatisticValues::Ladder {
                values: vec![
                    Some(NormalizedValue::Integer(1)),
                    None,
                    Some(NormalizedValue::Integer(3))
                ]
            }
        );
    }
}
