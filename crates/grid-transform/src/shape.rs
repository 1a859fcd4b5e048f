//! Record shapes: which variables feed which record fields.

use crate::curve::CurveOptions;
use serde::{Deserialize, Serialize};

/// Binding of a scenario label to the variable holding its mean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioColumn {
    pub label: String,
    pub variable: String,
}

/// Layout of the records built from one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordShape {
    /// Mean with optional 10th/90th percentiles.
    MeanPercentiles {
        mean: String,
        #[serde(default)]
        pctl10: Option<String>,
        #[serde(default)]
        pctl90: Option<String>,
    },
    LowMidHigh {
        low: String,
        mid: String,
        high: String,
    },
    /// Fixed-length list of values.
    Ladder { values: Vec<String> },
    /// Paired x/y arrays, simplified before storage.
    Curve {
        x: Vec<String>,
        y: Vec<String>,
        #[serde(default)]
        options: CurveOptions,
    },
    /// One mean-only record per warming level stored as its own variable.
    ScenarioColumns { columns: Vec<ScenarioColumn> },
}

impl RecordShape {
    /// Bound variable names, in the order their samples appear in a row.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            RecordShape::MeanPercentiles {
                mean,
                pctl10,
                pctl90,
            } => std::iter::once(mean.as_str())
                .chain(pctl10.as_deref())
                .chain(pctl90.as_deref())
                .collect(),
            RecordShape::LowMidHigh { low, mid, high } => {
                vec![low.as_str(), mid.as_str(), high.as_str()]
            }
            RecordShape::Ladder { values } => values.iter().map(String::as_str).collect(),
            RecordShape::Curve { x, y, .. } => x.iter().chain(y).map(String::as_str).collect(),
            RecordShape::ScenarioColumns { columns } => {
                columns.iter().map(|c| c.variable.as_str()).collect()
            }
        }
    }

    /// Whether the scenario label comes from a grid dimension.
    pub fn uses_scenario_dimension(&self) -> bool {
        !matches!(self, RecordShape::ScenarioColumns { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordShape::MeanPercentiles { .. } => "mean_percentiles",
            RecordShape::LowMidHigh { .. } => "low_mid_high",
            RecordShape::Ladder { .. } => "ladder",
            RecordShape::Curve { .. } => "curve",
            RecordShape::ScenarioColumns { .. } => "scenario_columns",
        }
    }
}
