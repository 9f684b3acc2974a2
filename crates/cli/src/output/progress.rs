//! Progress bar for transfer runs

use indicatif::{ProgressBar, ProgressStyle};
use xfer_core::{TaskReport, TaskState};

/// Task-count progress bar, hidden in JSON and quiet modes
#[derive(Debug, Clone)]
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    pub fn new(tasks: usize, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(tasks as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message("Transferring...");
        Self { bar }
    }

    /// Record one finished task
    pub fn task_done(&self, report: &TaskReport) {
        if let TaskState::Failed(_) = report.state {
            self.bar.set_message(format!("failed: {}", report.source));
        } else {
            self.bar.set_message(report.destination.file_name().to_string());
        }
        self.bar.inc(1);
    }

    pub fn finish(&self, message: &'static str) {
        self.bar.finish_with_message(message);
    }
}
