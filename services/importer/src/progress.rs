//! Terminal progress bars for dataset syncs.

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use ingestion::{ProgressError, ProgressSink};

const TEMPLATE: &str = "[{elapsed_precise}] {prefix} {bar:40.cyan/blue} {pos}/{len} records {msg}";

/// One bar per dataset, drawn on stderr. Hidden when stderr is not a terminal.
#[derive(Default)]
pub struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = guard.as_ref() {
            f(bar);
        }
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, dataset_id: i32, total: Option<u64>) -> Result<(), ProgressError> {
        let style = ProgressStyle::with_template(TEMPLATE)
            .map_err(|e| ProgressError(e.to_string()))?
            .progress_chars("##-");
        let bar = match total {
            Some(total) => ProgressBar::new(total).with_style(style),
            None => ProgressBar::new_spinner(),
        };
        bar.set_prefix(format!("dataset {}", dataset_id));

        let mut guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = guard.replace(bar) {
            previous.abandon();
        }
        Ok(())
    }

    fn advance(&self, _dataset_id: i32, processed: u64) -> Result<(), ProgressError> {
        self.with_bar(|bar| bar.set_position(processed));
        Ok(())
    }

    fn finish(&self, _dataset_id: i32, processed: u64) -> Result<(), ProgressError> {
        self.with_bar(|bar| {
            bar.set_position(processed);
            bar.finish_with_message("done");
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_lifecycle() {
        let progress = BarProgress::new();
        progress.advance(1, 10).unwrap();
        progress.start(1, Some(100)).unwrap();
        progress.advance(1, 50).unwrap();
        progress.finish(1, 100).unwrap();
        let guard = progress.bar.lock().unwrap();
        assert_eq!(guard.as_ref().map(|b| b.position()), Some(100));
    }
}
