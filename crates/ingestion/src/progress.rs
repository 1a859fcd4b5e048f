//! Progress reporting for dataset syncs.
//!
//! Sinks may fail (a closed terminal, a broken pipe); the sync engine logs
//! such failures and carries on.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("progress sink failed: {0}")]
pub struct ProgressError(pub String);

pub trait ProgressSink: Send + Sync {
    /// A dataset sync starts. `total` is the expected record count, if known.
    fn start(&self, dataset_id: i32, total: Option<u64>) -> Result<(), ProgressError>;

    /// `processed` records of the dataset have been written so far.
    fn advance(&self, dataset_id: i32, processed: u64) -> Result<(), ProgressError>;

    fn finish(&self, dataset_id: i32, processed: u64) -> Result<(), ProgressError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn start(&self, _dataset_id: i32, _total: Option<u64>) -> Result<(), ProgressError> {
        Ok(())
    }

    fn advance(&self, _dataset_id: i32, _processed: u64) -> Result<(), ProgressError> {
        Ok(())
    }

    fn finish(&self, _dataset_id: i32, _processed: u64) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Logs progress at info level every `every` records.
#[derive(Debug)]
pub struct LogProgress {
    every: u64,
    total: AtomicU64,
    last: AtomicU64,
}

impl LogProgress {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            total: AtomicU64::new(0),
            last: AtomicU64::new(0),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ProgressSink for LogProgress {
    fn start(&self, dataset_id: i32, total: Option<u64>) -> Result<(), ProgressError> {
        self.total.store(total.unwrap_or(0), Ordering::Relaxed);
        self.last.store(0, Ordering::Relaxed);
        info!(dataset_id, total = ?total, "Sync started");
        Ok(())
    }

    fn advance(&self, dataset_id: i32, processed: u64) -> Result<(), ProgressError> {
        let last = self.last.load(Ordering::Relaxed);
        if processed >= last + self.every {
            self.last.store(processed, Ordering::Relaxed);
            let total = self.total.load(Ordering::Relaxed);
            info!(dataset_id, processed, total, "Sync progress");
        }
        Ok(())
    }

    fn finish(&self, dataset_id: i32, processed: u64) -> Result<(), ProgressError> {
        info!(dataset_id, processed, "Sync finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_throttles() {
        let progress = LogProgress::new(100);
        progress.start(1, Some(1000)).unwrap();
        progress.advance(1, 50).unwrap();
        assert_eq!(progress.last.load(Ordering::Relaxed), 0);
        progress.advance(1, 150).unwrap();
        assert_eq!(progress.last.load(Ordering::Relaxed), 150);
        progress.finish(1, 1000).unwrap();
    }
}
