//! Statistic records and dataset headers, the output of the transform.

use crate::grid::DimensionValue;
use crate::unit::Unit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A storage-ready numeric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Integer(i64),
    /// Positional decimal text with a fixed number of fractional digits.
    Decimal(String),
    Float(f64),
}

impl NormalizedValue {
    /// Text accepted by a `numeric` column cast.
    pub fn to_sql_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Integer(v) => write!(f, "{}", v),
            NormalizedValue::Decimal(s) => f.write_str(s),
            NormalizedValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Value fields of a record. The variant is fixed per dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum StatisticValues {
    MeanPercentiles {
        mean: Option<NormalizedValue>,
        pctl10: Option<NormalizedValue>,
        pctl90: Option<NormalizedValue>,
    },
    LowMidHigh {
        low: Option<NormalizedValue>,
        mid: Option<NormalizedValue>,
        high: Option<NormalizedValue>,
    },
    /// One slot per bound variable; `None` marks a missing sample.
    Ladder {
        values: Vec<Option<NormalizedValue>>,
    },
    Curve {
        x: Vec<NormalizedValue>,
        y: Vec<NormalizedValue>,
    },
}

/// Identity of a record inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub dataset_id: i32,
    pub coordinate_hash: String,
    pub warming_scenario: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticRecord {
    pub dataset_id: i32,
    pub coordinate_hash: String,
    pub warming_scenario: String,
    pub values: StatisticValues,
}

impl StatisticRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            dataset_id: self.dataset_id,
            coordinate_hash: self.coordinate_hash.clone(),
            warming_scenario: self.warming_scenario.clone(),
        }
    }
}

/// Descriptive row that owns a dataset's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHeader {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_category: Option<String>,
    pub sub_category: Option<String>,
    pub model: Option<String>,
    pub unit: Unit,
}

/// Canonical spelling of a model name.
pub fn normalized_model(model: &str) -> String {
    match model.trim() {
        "globalREMO" => "global REMO".to_string(),
        other => other.to_string(),
    }
}

/// Stable textual label for a scenario coordinate.
///
/// Whole numbers keep one fractional digit (`2.0`), other numbers use the
/// shortest representation (`1.5`), labels pass through.
pub fn scenario_label(value: &DimensionValue) -> String {
    match value {
        DimensionValue::Number(v) if v.fract() == 0.0 && v.abs() < 1e16 => {
            format!("{:.1}", crate::grid::unsigned_zero(*v))
        }
        DimensionValue::Number(v) => format!("{}", v),
        DimensionValue::Label(s) => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_scenario_label() {
        assert_eq!(scenario_label(&DimensionValue::Number(1.5)), "1.5");
        assert_eq!(scenario_label(&DimensionValue::Number(2.0)), "2.0");
        assert_eq!(scenario_label(&DimensionValue::Number(-0.0)), "0.0");
        assert_eq!(scenario_label(&DimensionValue::Number(2020.0)), "2020.0");
        assert_eq!(
            scenario_label(&DimensionValue::Label(Arc::from("baseline"))),
            "baseline"
        );
    }

    #[test]
    fn test_sql_text() {
        assert_eq!(NormalizedValue::Integer(-3).to_sql_text(), "-3");
        assert_eq!(NormalizedValue::Decimal("28.0".into()).to_sql_text(), "28.0");
        assert_eq!(NormalizedValue::Float(12.25).to_sql_text(), "12.25");
    }

    #[test]
    fn test_normalized_model() {
        assert_eq!(normalized_model("globalREMO"), "global REMO");
        assert_eq!(normalized_model(" RegCM4 "), "RegCM4");
    }

    #[test]
    fn test_record_key() {
        let record = StatisticRecord {
            dataset_id: 40101,
            coordinate_hash: "abc".into(),
            warming_scenario: "1.5".into(),
            values: StatisticValues::Ladder { values: vec![] },
        };
        let key = record.key();
        assert_eq!(key.dataset_id, 40101);
        assert_eq!(key.warming_scenario, "1.5");
    }
}
