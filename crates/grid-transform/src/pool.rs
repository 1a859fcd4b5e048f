//! Parallel record building over row chunks.

use crate::builder::RecordBuilder;
use crate::error::{Result, TransformError};
use crate::flatten::FlatRow;
use climate_common::StatisticRecord;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What to do with a row whose record cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowErrorPolicy {
    /// Log and drop the row.
    #[default]
    Skip,
    /// Fail the whole dataset.
    Abort,
}

/// Records built from one chunk of rows, in row order.
#[derive(Debug, Default)]
pub struct ChunkOutput {
    pub records: Vec<StatisticRecord>,
    pub skipped: usize,
}

/// Bounded worker pool mapping a [`RecordBuilder`] over row chunks.
pub struct BuildPool {
    pool: rayon::ThreadPool,
    policy: RowErrorPolicy,
}

impl BuildPool {
    /// Create a pool with `workers` threads, or one per core when `None`.
    pub fn new(workers: Option<usize>, policy: RowErrorPolicy) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.unwrap_or(0))
            .thread_name(|i| format!("record-builder-{}", i))
            .build()
            .map_err(|e| TransformError::WorkerPool(e.to_string()))?;
        Ok(Self { pool, policy })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn build_chunk(&self, builder: &RecordBuilder, rows: &[FlatRow]) -> Result<ChunkOutput> {
        let built: Vec<Result<Vec<StatisticRecord>>> =
            self.pool.install(|| rows.par_iter().map(|row| builder.build(row)).collect());

        let mut output = ChunkOutput {
            records: Vec::with_capacity(rows.len()),
            skipped: 0,
        };
        for (row, result) in rows.iter().zip(built) {
            match result {
                Ok(records) => output.records.extend(records),
                Err(e) if self.policy == RowErrorPolicy::Skip && !e.is_configuration() => {
                    warn!(position = row.position, error = %e, "Skipping row");
                    output.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(output)
    }
}

impl std::fmt::Debug for BuildPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildPool")
            .field("workers", &self.workers())
            .field("policy", &self.policy)
            .finish()
    }
}
