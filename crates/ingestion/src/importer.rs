//! Dataset import pipeline.
//!
//! ```text
//! GridSourceReader -> GridFlattener -> BuildPool --mpsc--> SyncEngine -> store
//!     (blocking thread)                                (async task)
//! ```
//!
//! The grid file is read and the record builder is resolved before anything
//! is written, so configuration problems never leave partial state. Rows are
//! then flattened lazily and built in chunks on the worker pool, and the
//! chunks are handed to the sync engine over a bounded channel.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use climate_common::{
    normalized_model, DatasetHeader, GlobalAttributes, GridSource, StatisticRecord, Unit,
};
use grid_transform::{BuildPool, DatasetMeta, FlatRow, GridFlattener, RecordBuilder};
use serde::Serialize;
use storage::StatisticStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{DatasetConfig, ImportConfig};
use crate::error::{IngestionError, Result};
use crate::progress::{NoopProgress, ProgressSink};
use crate::sync::{SyncEngine, SyncOptions, SyncReport};

/// Opens the grid file of a dataset. Called on a blocking thread.
pub trait GridSourceReader: Send + Sync {
    fn open(&self, dataset: &DatasetConfig, variables: &[&str]) -> Result<GridSource>;
}

/// Reads NetCDF files named by `DatasetConfig::filename`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetCdfReader;

impl GridSourceReader for NetCdfReader {
    fn open(&self, dataset: &DatasetConfig, variables: &[&str]) -> Result<GridSource> {
        Ok(netcdf_parser::open_grid_source(
            Path::new(&dataset.filename),
            &dataset.dimensions,
            variables,
        )?)
    }
}

/// Serves pre-built sources keyed by dataset id.
#[derive(Debug, Default, Clone)]
pub struct StaticSources {
    sources: HashMap<i64, GridSource>,
}

impl StaticSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, dataset_id: i64, source: GridSource) -> Self {
        self.sources.insert(dataset_id, source);
        self
    }
}

impl GridSourceReader for StaticSources {
    fn open(&self, dataset: &DatasetConfig, variables: &[&str]) -> Result<GridSource> {
        let source = self.sources.get(&dataset.id).ok_or_else(|| {
            IngestionError::InvalidConfig(format!("no grid source for dataset {}", dataset.id))
        })?;
        for name in variables {
            if source.variable(name).is_none() {
                return Err(grid_transform::TransformError::MissingVariable(name.to_string()).into());
            }
        }
        Ok(source.clone())
    }
}

/// Per-run settings that are not part of the import configuration.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Keep only the first N rows that survive null filtering.
    pub sample_size: Option<usize>,
    pub resume_from_batch: usize,
    pub batch_size: Option<usize>,
    /// Marks reports as coming from a run against a throwaway store.
    pub dry_run: bool,
}

/// Outcome of `load_all`: one report per imported dataset and one message
/// per failed dataset.
#[derive(Debug, Default, Serialize)]
pub struct LoadAllReport {
    pub imported: Vec<SyncReport>,
    pub failed: Vec<DatasetFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetFailure {
    pub dataset_id: i64,
    pub message: String,
    pub resume_from_batch: Option<usize>,
}

/// Counts gathered by the producer thread.
#[derive(Debug, Default)]
struct ProducerStats {
    rows_flattened: u64,
    rows_dropped: u64,
    rows_skipped: u64,
    records_built: u64,
}

pub struct Importer {
    config: Arc<ImportConfig>,
    store: Arc<dyn StatisticStore>,
    reader: Arc<dyn GridSourceReader>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    options: ImportOptions,
}

impl Importer {
    pub fn new(
        config: Arc<ImportConfig>,
        store: Arc<dyn StatisticStore>,
        reader: Arc<dyn GridSourceReader>,
    ) -> Self {
        Self {
            config,
            store,
            reader,
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
            options: ImportOptions::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StatisticStore> {
        &self.store
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Import one dataset by id.
    #[instrument(skip(self))]
    pub async fn load_dataset(&self, id: i64) -> Result<SyncReport> {
        let dataset = self
            .config
            .dataset(id)
            .cloned()
            .ok_or(IngestionError::UnknownDataset(id))?;
        let dataset_id = i32::try_from(dataset.id)
            .map_err(|_| IngestionError::InvalidConfig(format!("malformed dataset id {}", id)))?;

        let source = {
            let reader = Arc::clone(&self.reader);
            let dataset = dataset.clone();
            tokio::task::spawn_blocking(move || {
                let variables = dataset.shape.variables();
                reader.open(&dataset, &variables)
            })
            .await
            .map_err(|e| IngestionError::Worker(e.to_string()))??
        };

        let header = dataset_header(dataset_id, &dataset, &source.attributes)?;
        let meta = DatasetMeta {
            dataset_id,
            grid: dataset.grid,
            unit: header.unit,
            shape: dataset.shape.clone(),
            roles: dataset.roles.clone(),
        };
        let builder = RecordBuilder::new(meta, &source.spec)?;
        // Checks buffer lengths against the lattice before the first write.
        GridFlattener::new(&source.spec, bound_buffers(&builder, &source)?, dataset.null_policy)?;

        let sync = &self.config.sync;
        let pool = BuildPool::new(sync.workers, dataset.row_errors)?;
        let total = self.expected_records(&builder, &source);
        info!(
            dataset_id,
            file = %dataset.filename,
            grid = %dataset.grid,
            shape = dataset.shape.name(),
            workers = pool.workers(),
            expected_records = ?total,
            "Importing dataset"
        );

        let (tx, mut rx) = mpsc::channel(sync.channel_capacity);
        let producer = {
            let cancel = self.cancel.clone();
            let chunk_size = sync.build_chunk_size;
            let sample_size = self.options.sample_size;
            let null_policy = dataset.null_policy;
            tokio::task::spawn_blocking(move || {
                produce(
                    &source,
                    &builder,
                    &pool,
                    null_policy,
                    chunk_size,
                    sample_size,
                    &cancel,
                    &tx,
                )
            })
        };

        let mut engine = SyncEngine::new(
            Arc::clone(&self.store),
            SyncOptions {
                protocol: dataset.protocol(sync),
                batch_size: self.options.batch_size.unwrap_or(sync.batch_size),
                max_batch_retries: sync.max_batch_retries,
                retry_backoff: Duration::from_millis(sync.retry_backoff_ms),
                resume_from_batch: self.options.resume_from_batch,
            },
        )
        .with_progress(Arc::clone(&self.progress))
        .with_cancellation(self.cancel.clone());

        let result = engine.sync(&header, &mut rx, total).await;
        // Unblocks a producer still waiting on a full channel.
        drop(rx);
        let stats = producer
            .await
            .map_err(|e| IngestionError::Worker(e.to_string()))?;

        let mut report = result?;
        report.dry_run = self.options.dry_run;
        report.rows_flattened = stats.rows_flattened;
        report.rows_dropped = stats.rows_dropped;
        report.rows_skipped = stats.rows_skipped;
        report.records_built = stats.records_built;
        info!(
            dataset_id,
            rows = report.rows_flattened,
            dropped = report.rows_dropped,
            skipped = report.rows_skipped,
            records = report.records_written,
            "Dataset imported"
        );
        Ok(report)
    }

    /// Import every configured dataset in order. A failed dataset is logged
    /// and the run moves on; cancellation stops the run.
    pub async fn load_all(&self) -> LoadAllReport {
        let mut report = LoadAllReport::default();
        for dataset in &self.config.datasets {
            if self.cancel.is_cancelled() {
                warn!("Import cancelled; remaining datasets skipped");
                break;
            }
            match self.load_dataset(dataset.id).await {
                Ok(imported) => report.imported.push(imported),
                Err(e) => {
                    error!(dataset_id = dataset.id, kind = ?e.kind(), error = %e, "Dataset import failed");
                    report.failed.push(DatasetFailure {
                        dataset_id: dataset.id,
                        message: e.to_string(),
                        resume_from_batch: e.resume_batch(),
                    });
                }
            }
        }
        report
    }

    /// Upper bound on the records a dataset yields, for progress display.
    fn expected_records(&self, builder: &RecordBuilder, source: &GridSource) -> Option<u64> {
        let rows = source.spec.cell_count()?;
        let rows = match self.options.sample_size {
            Some(limit) => rows.min(limit),
            None => rows,
        };
        let per_row = match &builder.meta().shape {
            grid_transform::RecordShape::ScenarioColumns { columns } => columns.len(),
            _ => 1,
        };
        Some((rows * per_row) as u64)
    }
}

fn bound_buffers<'a>(
    builder: &RecordBuilder,
    source: &'a GridSource,
) -> Result<Vec<&'a climate_common::VariableBuffer>> {
    builder
        .variables()
        .into_iter()
        .map(|name| {
            source.variable(name).ok_or_else(|| {
                grid_transform::TransformError::MissingVariable(name.to_string()).into()
            })
        })
        .collect()
}

/// Flatten, build and send chunks until the rows run out, the sample limit
/// is reached, the run is cancelled or the receiver goes away.
#[allow(clippy::too_many_arguments)]
fn produce(
    source: &GridSource,
    builder: &RecordBuilder,
    pool: &BuildPool,
    null_policy: grid_transform::NullPolicy,
    chunk_size: usize,
    sample_size: Option<usize>,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<Result<Vec<StatisticRecord>>>,
) -> ProducerStats {
    let mut stats = ProducerStats::default();
    let buffers = match bound_buffers(builder, source) {
        Ok(buffers) => buffers,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return stats;
        }
    };
    let flattener = match GridFlattener::new(&source.spec, buffers, null_policy) {
        Ok(flattener) => flattener,
        Err(e) => {
            let _ = tx.blocking_send(Err(e.into()));
            return stats;
        }
    };

    let mut rows = flattener.rows();
    let mut remaining = sample_size.unwrap_or(usize::MAX);
    while remaining > 0 && !cancel.is_cancelled() {
        let chunk: Vec<FlatRow> = rows.by_ref().take(chunk_size.min(remaining)).collect();
        if chunk.is_empty() {
            break;
        }
        remaining -= chunk.len();
        stats.rows_flattened += chunk.len() as u64;

        match pool.build_chunk(builder, &chunk) {
            Ok(output) => {
                stats.rows_skipped += output.skipped as u64;
                stats.records_built += output.records.len() as u64;
                if tx.blocking_send(Ok(output.records)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                break;
            }
        }
    }
    stats.rows_dropped = rows.dropped() as u64;
    stats
}

/// Header from the dataset configuration, with gaps filled from the grid
/// file's global attributes.
pub fn dataset_header(
    dataset_id: i32,
    dataset: &DatasetConfig,
    attributes: &GlobalAttributes,
) -> Result<DatasetHeader> {
    if let Some(file_id) = attributes.id {
        if file_id != i64::from(dataset_id) {
            return Err(IngestionError::InvalidConfig(format!(
                "{} declares dataset id {}, configured as {}",
                dataset.filename, file_id, dataset_id
            )));
        }
    }

    let name = dataset
        .name
        .clone()
        .or_else(|| attributes.title.clone())
        .ok_or_else(|| {
            IngestionError::InvalidConfig(format!("dataset {} has no name or title", dataset_id))
        })?;
    let unit = match (dataset.unit, attributes.unit.as_deref()) {
        (Some(unit), _) => unit,
        (None, Some(unit)) => unit.parse::<Unit>()?,
        (None, None) => {
            return Err(IngestionError::InvalidConfig(format!(
                "dataset {} has no unit",
                dataset_id
            )))
        }
    };

    Ok(DatasetHeader {
        id: dataset_id,
        slug: dataset.slug.clone().unwrap_or_else(|| slugify(&name)),
        name,
        description: dataset
            .description
            .clone()
            .or_else(|| attributes.description.clone()),
        parent_category: dataset
            .parent_category
            .clone()
            .or_else(|| attributes.category.clone()),
        sub_category: dataset.sub_category.clone(),
        model: dataset
            .model
            .as_deref()
            .or(attributes.model.as_deref())
            .map(normalized_model),
        unit,
    })
}

fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use climate_common::GridKind;
    use grid_transform::RecordShape;

    fn dataset() -> DatasetConfig {
        serde_yaml::from_str(
            r#"
id: 40101
filename: mean_temp.nc
grid: GCM
shape: {type: mean_percentiles, mean: mean}
"#,
        )
        .unwrap()
    }

    fn attributes() -> GlobalAttributes {
        GlobalAttributes {
            id: Some(40101),
            title: Some("Change in average temperature".into()),
            description: Some("from the file".into()),
            category: Some("Heat".into()),
            model: Some("globalREMO".into()),
            unit: Some("Â°C".into()),
        }
    }

    #[test]
    fn test_header_from_attributes() {
        let header = dataset_header(40101, &dataset(), &attributes()).unwrap();
        assert_eq!(header.name, "Change in average temperature");
        assert_eq!(header.slug, "change-in-average-temperature");
        assert_eq!(header.parent_category.as_deref(), Some("Heat"));
        assert_eq!(header.model.as_deref(), Some("global REMO"));
        assert_eq!(header.unit, Unit::DegreesCelsius);
    }

    #[test]
    fn test_configuration_wins_over_attributes() {
        let mut dataset = dataset();
        dataset.name = Some("Average temperature".into());
        dataset.slug = Some("avg-temp".into());
        dataset.unit = Some(Unit::ZScore);
        let header = dataset_header(40101, &dataset, &attributes()).unwrap();
        assert_eq!(header.name, "Average temperature");
        assert_eq!(header.slug, "avg-temp");
        assert_eq!(header.unit, Unit::ZScore);
        assert_eq!(header.description.as_deref(), Some("from the file"));
    }

    #[test]
    fn test_mismatched_file_id_is_fatal() {
        let err = dataset_header(40102, &dataset(), &attributes()).unwrap_err();
        assert!(matches!(err, IngestionError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_attribute_unit_is_fatal() {
        let mut attributes = attributes();
        attributes.unit = Some("furlongs".into());
        let err = dataset_header(40101, &dataset(), &attributes).unwrap_err();
        assert!(matches!(err, IngestionError::Common(_)));
    }

    #[test]
    fn test_static_sources_check_variables() {
        let source = test_utils::synthetic_source(2, 2, 0);
        let reader = StaticSources::new().with_source(40101, source);
        assert!(reader.open(&dataset(), &["mean"]).is_ok());
        assert!(reader.open(&dataset(), &["absent"]).is_err());

        let mut other = dataset();
        other.id = 5;
        other.grid = GridKind::Rcm;
        other.shape = RecordShape::Ladder {
            values: vec!["mean".into()],
        };
        assert!(reader.open(&other, &["mean"]).is_err());
    }
}
