//! Per-task outcomes of an executed plan

use serde::Serialize;

use crate::locator::Locator;
use crate::task::{TaskState, TransferPlan, TransferTask};

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub index: usize,
    pub source: Locator,
    pub destination: Locator,
    pub state: TaskState,
    /// Transfer attempts made, zero if the task never started
    pub attempts: u32,
    /// Bytes held by the destination when the task ended
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskReport {
    pub(crate) fn new(task: &TransferTask, attempts: u32, bytes: u64, error: Option<String>) -> Self {
        Self {
            index: task.index(),
            source: task.source().clone(),
            destination: task.destination().clone(),
            state: task.state(),
            attempts,
            bytes,
            error,
        }
    }
}

/// Aggregated outcome of a run, in plan order
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferReport {
    entries: Vec<TaskReport>,
    cancelled: bool,
}

impl TransferReport {
    pub fn entries(&self) -> &[TaskReport] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the run-level cancellation signal was raised
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| s == TaskState::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| s == TaskState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskState::Failed(_)))
    }

    pub fn cancelled_tasks(&self) -> usize {
        self.count(|s| s == TaskState::Cancelled)
    }

    /// Bytes written by tasks that succeeded
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.state == TaskState::Succeeded)
            .map(|e| e.bytes)
            .sum()
    }

    /// True when no task failed or was cancelled
    pub fn is_success(&self) -> bool {
        !self.entries.iter().any(|e| e.state.is_failure())
    }

    fn count(&self, pred: impl Fn(TaskState) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(e.state)).count()
    }
}

/// Collects reports as tasks finish, in any order
///
/// Owned by the single future driving the run, so recording needs no lock.
#[derive(Debug)]
pub(crate) struct ReportCollector {
    slots: Vec<Option<TaskReport>>,
}

impl ReportCollector {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    pub(crate) fn record(&mut self, report: TaskReport) {
        let index = report.index;
        match self.slots.get_mut(index) {
            Some(slot) => {
                debug_assert!(slot.is_none(), "task {index} reported twice");
                *slot = Some(report);
            }
            None => tracing::warn!(index, "Report for unknown task ignored"),
        }
    }

    /// Build the final report; tasks that never reported end `Cancelled`
    pub(crate) fn finish(self, plan: &TransferPlan, cancelled: bool) -> TransferReport {
        let entries = self
            .slots
            .into_iter()
            .zip(plan.tasks())
            .map(|(slot, task)| {
                slot.unwrap_or_else(|| {
                    let mut task = task.clone();
                    task.set_state(TaskState::Cancelled);
                    TaskReport::new(&task, 0, 0, None)
                })
            })
            .collect();

        TransferReport { entries, cancelled }
    }
}
