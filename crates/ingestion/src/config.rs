//! Import configuration.
//!
//! One YAML file declares the coordinate grids, the datasets and the sync
//! settings:
//!
//! ```yaml
//! grids:
//!   - kind: GCM
//!     lon: [-179.75, -179.25]
//!     lat: [-89.75, -89.25]
//! sync:
//!   batch_size: 1000
//!   protocol: merge_by_key
//! datasets:
//!   - id: 40101
//!     filename: ${PF_DATA_DIR}/mean_temp.nc
//!     grid: GCM
//!     unit: "°C"
//!     shape: { type: mean_percentiles, mean: mean, pctl10: pctl10, pctl90: pctl90 }
//! ```
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}` syntax.

use anyhow::{Context, Result};
use climate_common::{GridKind, Unit};
use grid_transform::{DimensionRoles, NullPolicy, RecordShape, RowErrorPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::sync::SyncProtocol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub grids: Vec<GridConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

impl ImportConfig {
    pub fn dataset(&self, id: i64) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.id == id)
    }
}

/// Coordinate lattice of one grid kind, given inline or read from the
/// coordinate variables of a NetCDF file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub kind: GridKind,
    #[serde(default)]
    pub lon: Vec<f64>,
    #[serde(default)]
    pub lat: Vec<f64>,
    pub filename: Option<String>,
    #[serde(default = "default_lon_name")]
    pub lon_name: String,
    #[serde(default = "default_lat_name")]
    pub lat_name: String,
}

fn default_lon_name() -> String {
    "lon".to_string()
}

fn default_lat_name() -> String {
    "lat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Records per write batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Protocol for datasets that do not name one.
    #[serde(default)]
    pub protocol: SyncProtocol,
    /// Extra attempts per merge batch on transient store errors.
    #[serde(default = "default_max_batch_retries")]
    pub max_batch_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Rows handed to the worker pool at a time.
    #[serde(default = "default_build_chunk_size")]
    pub build_chunk_size: usize,
    /// Record builder threads; one per core when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Built chunks buffered between the worker pool and the writer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_batch_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_build_chunk_size() -> usize {
    1024
}

fn default_channel_capacity() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            protocol: SyncProtocol::default(),
            max_batch_retries: default_max_batch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            build_chunk_size: default_build_chunk_size(),
            workers: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// One importable dataset. Descriptive fields left out here are taken from
/// the grid file's global attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub id: i64,
    pub filename: String,
    pub grid: GridKind,
    pub shape: RecordShape,
    pub unit: Option<Unit>,
    pub slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_category: Option<String>,
    pub sub_category: Option<String>,
    pub model: Option<String>,
    /// Expected dimension order of every bound variable.
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub roles: DimensionRoles,
    #[serde(default)]
    pub null_policy: NullPolicy,
    #[serde(default)]
    pub row_errors: RowErrorPolicy,
    pub protocol: Option<SyncProtocol>,
}

impl DatasetConfig {
    pub fn protocol(&self, sync: &SyncConfig) -> SyncProtocol {
        self.protocol.unwrap_or(sync.protocol)
    }
}

// ============================================================================
// Loading
// ============================================================================

pub fn load_import_config<P: AsRef<Path>>(path: P) -> Result<ImportConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read import config: {}", path.display()))?;
    parse_import_config(&content)
        .with_context(|| format!("Invalid import config: {}", path.display()))
}

pub fn parse_import_config(content: &str) -> Result<ImportConfig> {
    let expanded = expand_env_vars(content)?;
    let config: ImportConfig =
        serde_yaml::from_str(&expanded).context("Failed to parse import config YAML")?;
    validate_import_config(&config)?;
    Ok(config)
}

/// Expand `${VAR}` and `${VAR:-default}`. An unset variable without a
/// default is an error.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    match expr.split_once(":-") {
        Some((name, default)) => match std::env::var(name.trim()) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Ok(default.to_string()),
        },
        None => std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr)),
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_import_config(config: &ImportConfig) -> Result<()> {
    validate_sync_config(&config.sync)?;

    let mut kinds = HashSet::new();
    for grid in &config.grids {
        anyhow::ensure!(kinds.insert(grid.kind), "Grid {} is declared twice", grid.kind);
        anyhow::ensure!(
            grid.filename.is_some() || (!grid.lon.is_empty() && !grid.lat.is_empty()),
            "Grid {} needs lon and lat values or a filename",
            grid.kind
        );
    }

    let mut ids = HashSet::new();
    for dataset in &config.datasets {
        validate_dataset_config(dataset)?;
        anyhow::ensure!(
            ids.insert(dataset.id),
            "Dataset id {} is declared twice",
            dataset.id
        );
    }

    Ok(())
}

fn validate_sync_config(sync: &SyncConfig) -> Result<()> {
    anyhow::ensure!(sync.batch_size > 0, "sync.batch_size must be greater than 0");
    anyhow::ensure!(
        sync.build_chunk_size > 0,
        "sync.build_chunk_size must be greater than 0"
    );
    anyhow::ensure!(
        sync.channel_capacity > 0,
        "sync.channel_capacity must be greater than 0"
    );
    anyhow::ensure!(
        sync.workers != Some(0),
        "sync.workers must be greater than 0 when set"
    );
    Ok(())
}

fn validate_dataset_config(dataset: &DatasetConfig) -> Result<()> {
    anyhow::ensure!(
        dataset.id > 0 && dataset.id <= i64::from(i32::MAX),
        "Malformed dataset id: {}",
        dataset.id
    );
    anyhow::ensure!(
        !dataset.filename.trim().is_empty(),
        "Dataset {}: filename cannot be empty",
        dataset.id
    );

    let variables = dataset.shape.variables();
    anyhow::ensure!(
        !variables.is_empty() && variables.iter().all(|v| !v.is_empty()),
        "Dataset {}: {} shape must bind at least one variable",
        dataset.id,
        dataset.shape.name()
    );
    match &dataset.shape {
        RecordShape::Curve { x, y, .. } => anyhow::ensure!(
            x.len() == y.len(),
            "Dataset {}: curve binds {} x and {} y variables",
            dataset.id,
            x.len(),
            y.len()
        ),
        RecordShape::ScenarioColumns { columns } => {
            let mut labels = HashSet::new();
            for column in columns {
                anyhow::ensure!(
                    labels.insert(column.label.as_str()),
                    "Dataset {}: scenario label {} is bound twice",
                    dataset.id,
                    column.label
                );
            }
        }
        _ => {}
    }

    if !dataset.dimensions.is_empty() {
        let declared: HashSet<&str> = dataset.dimensions.iter().map(String::as_str).collect();
        anyhow::ensure!(
            declared.len() == dataset.dimensions.len(),
            "Dataset {}: duplicate dimension in {:?}",
            dataset.id,
            dataset.dimensions
        );

        let mut roles = vec![
            ("longitude", &dataset.roles.longitude),
            ("latitude", &dataset.roles.latitude),
        ];
        if dataset.shape.uses_scenario_dimension() {
            roles.push(("scenario", &dataset.roles.scenario));
        }
        for (role, name) in roles {
            anyhow::ensure!(
                declared.contains(name.as_str()),
                "Dataset {}: {} dimension '{}' is not in {:?}",
                dataset.id,
                role,
                name,
                dataset.dimensions
            );
        }
    }

    Ok(())
}
