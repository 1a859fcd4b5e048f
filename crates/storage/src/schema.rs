//! Statically declared tables and row types.

use climate_common::{
    DatasetHeader, GridKind, NormalizedValue, RecordKey, StatisticRecord, StatisticValues,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Columns of the statistics table, in insert order.
pub const STATISTIC_COLUMNS: [&str; 12] = [
    "dataset_id",
    "coordinate_hash",
    "warming_scenario",
    "pctl10",
    "mean",
    "pctl90",
    "low_value",
    "mid_value",
    "high_value",
    "value_list",
    "x",
    "y",
];

/// Columns that identify a statistic row.
pub const KEY_COLUMNS: [&str; 3] = ["dataset_id", "coordinate_hash", "warming_scenario"];

/// DDL for the three tables. Used by local setups and tests.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS pf_datasets (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    description TEXT,
    parent_category TEXT,
    sub_category TEXT,
    model TEXT,
    unit TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pf_grid_coordinates (
    md5_hash TEXT PRIMARY KEY,
    grid TEXT NOT NULL,
    lon DOUBLE PRECISION NOT NULL,
    lat DOUBLE PRECISION NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pf_grid_coordinates_grid ON pf_grid_coordinates(grid);

CREATE TABLE IF NOT EXISTS pf_dataset_statistics (
    dataset_id INTEGER NOT NULL REFERENCES pf_datasets(id),
    coordinate_hash TEXT NOT NULL,
    warming_scenario TEXT NOT NULL,
    pctl10 NUMERIC,
    mean NUMERIC,
    pctl90 NUMERIC,
    low_value NUMERIC,
    mid_value NUMERIC,
    high_value NUMERIC,
    value_list NUMERIC[],
    x NUMERIC[],
    y NUMERIC[],
    PRIMARY KEY (dataset_id, coordinate_hash, warming_scenario)
);
"#;

/// Database form of a [`StatisticRecord`]. Numeric values travel as text so
/// that the decimal digits chosen by the normalizer reach the column intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StatisticRow {
    pub dataset_id: i32,
    pub coordinate_hash: String,
    pub warming_scenario: String,
    pub pctl10: Option<String>,
    pub mean: Option<String>,
    pub pctl90: Option<String>,
    pub low_value: Option<String>,
    pub mid_value: Option<String>,
    pub high_value: Option<String>,
    pub value_list: Option<Vec<Option<String>>>,
    pub x: Option<Vec<String>>,
    pub y: Option<Vec<String>>,
}

impl StatisticRow {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            dataset_id: self.dataset_id,
            coordinate_hash: self.coordinate_hash.clone(),
            warming_scenario: self.warming_scenario.clone(),
        }
    }

    fn empty(record: &StatisticRecord) -> Self {
        Self {
            dataset_id: record.dataset_id,
            coordinate_hash: record.coordinate_hash.clone(),
            warming_scenario: record.warming_scenario.clone(),
            pctl10: None,
            mean: None,
            pctl90: None,
            low_value: None,
            mid_value: None,
            high_value: None,
            value_list: None,
            x: None,
            y: None,
        }
    }
}

fn text(value: &Option<NormalizedValue>) -> Option<String> {
    value.as_ref().map(NormalizedValue::to_sql_text)
}

fn slots(values: &[Option<NormalizedValue>]) -> Option<Vec<Option<String>>> {
    Some(values.iter().map(text).collect())
}

fn texts(values: &[NormalizedValue]) -> Option<Vec<String>> {
    Some(values.iter().map(NormalizedValue::to_sql_text).collect())
}

impl From<&StatisticRecord> for StatisticRow {
    fn from(record: &StatisticRecord) -> Self {
        let mut row = StatisticRow::empty(record);
        match &record.values {
            StatisticValues::MeanPercentiles {
                mean,
                pctl10,
                pctl90,
            } => {
                row.mean = text(mean);
                row.pctl10 = text(pctl10);
                row.pctl90 = text(pctl90);
            }
            StatisticValues::LowMidHigh { low, mid, high } => {
                row.low_value = text(low);
                row.mid_value = text(mid);
                row.high_value = text(high);
            }
            StatisticValues::Ladder { values } => row.value_list = slots(values),
            StatisticValues::Curve { x, y } => {
                row.x = texts(x);
                row.y = texts(y);
            }
        }
        row
    }
}

/// Database form of a [`DatasetHeader`].
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DatasetRow {
    pub id: i32,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_category: Option<String>,
    pub sub_category: Option<String>,
    pub model: Option<String>,
    pub unit: String,
}

impl From<&DatasetHeader> for DatasetRow {
    fn from(header: &DatasetHeader) -> Self {
        Self {
            id: header.id,
            name: header.name.clone(),
            slug: header.slug.clone(),
            description: header.description.clone(),
            parent_category: header.parent_category.clone(),
            sub_category: header.sub_category.clone(),
            model: header.model.clone(),
            unit: header.unit.as_str().to_string(),
        }
    }
}

impl TryFrom<DatasetRow> for DatasetHeader {
    type Error = climate_common::CommonError;

    fn try_from(row: DatasetRow) -> Result<Self, Self::Error> {
        Ok(DatasetHeader {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            parent_category: row.parent_category,
            sub_category: row.sub_category,
            model: row.model,
            unit: row.unit.parse()?,
        })
    }
}

/// One lattice point of a grid with its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRow {
    pub md5_hash: String,
    pub grid: GridKind,
    pub lon: f64,
    pub lat: f64,
}

/// Check that `columns` is a non-empty set of statistics columns.
pub fn validate_columns(columns: &[&str]) -> Result<(), String> {
    if columns.is_empty() {
        return Err("no key columns given".to_string());
    }
    match columns.iter().find(|c| !STATISTIC_COLUMNS.contains(c)) {
        Some(unknown) => Err((*unknown).to_string()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_from_curve() {
        let record = StatisticRecord {
            dataset_id: 7,
            coordinate_hash: "h".into(),
            warming_scenario: "1.5".into(),
            values: StatisticValues::Curve {
                x: vec![NormalizedValue::Integer(0), NormalizedValue::Integer(3)],
                y: vec![
                    NormalizedValue::Decimal("100.0".into()),
                    NormalizedValue::Decimal("0.0".into()),
                ],
            },
        };
        let row = StatisticRow::from(&record);
        assert_eq!(row.x, Some(vec!["0".to_string(), "3".to_string()]));
        assert_eq!(row.y, Some(vec!["100.0".to_string(), "0.0".to_string()]));
        assert_eq!(row.mean, None);
        assert_eq!(row.key(), record.key());
    }

    #[test]
    fn test_row_from_ladder_keeps_slots() {
        let record = StatisticRecord {
            dataset_id: 7,
            coordinate_hash: "h".into(),
            warming_scenario: "2.0".into(),
            values: StatisticValues::Ladder {
                values: vec![
                    Some(NormalizedValue::Integer(5)),
                    None,
                    Some(NormalizedValue::Integer(9)),
                ],
            },
        };
        let row = StatisticRow::from(&record);
        assert_eq!(
            row.value_list,
            Some(vec![Some("5".to_string()), None, Some("9".to_string())])
        );
        assert_eq!(row.x, None);
    }

    #[test]
    fn test_validate_columns() {
        assert!(validate_columns(&KEY_COLUMNS).is_ok());
        assert_eq!(validate_columns(&["dataset_id", "bogus"]), Err("bogus".to_string()));
        assert!(validate_columns(&[]).is_err());
    }
}
