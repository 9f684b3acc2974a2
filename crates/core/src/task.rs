//! Transfer tasks and plans

use serde::Serialize;

use crate::capability::IfExists;
use crate::locator::Locator;

/// Why a failed task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A transient error was pending when the run was cancelled
    Retryable,
    /// Retrying cannot help, or the attempt limit was reached
    Fatal,
}

/// Lifecycle of one task: `Pending -> InFlight -> terminal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Succeeded,
    /// Destination already held the same object
    Skipped,
    /// Never started, or aborted by cancellation
    Cancelled,
    Failed(FailureKind),
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::InFlight)
    }

    /// Whether this outcome should make the run exit non-zero
    pub fn is_failure(self) -> bool {
        matches!(self, TaskState::Failed(_) | TaskState::Cancelled)
    }
}

/// Copy of one object from a resolved source to a resolved destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferTask {
    index: usize,
    source: Locator,
    destination: Locator,
    expected_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    state: TaskState,
}

impl TransferTask {
    pub(crate) fn new(
        index: usize,
        source: Locator,
        destination: Locator,
        expected_size: u64,
        etag: Option<String>,
    ) -> Self {
        Self {
            index,
            source,
            destination,
            expected_size,
            etag,
            state: TaskState::Pending,
        }
    }

    /// Position in the plan
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source(&self) -> &Locator {
        &self.source
    }

    pub fn destination(&self) -> &Locator {
        &self.destination
    }

    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        debug_assert!(!self.state.is_terminal(), "task {} already finished", self.index);
        self.state = state;
    }
}

/// Validated, ordered set of tasks for one run
///
/// Only [`TransferPlanner`](crate::planner::TransferPlanner) can build one,
/// so holding a plan means every capability check passed.
#[derive(Debug, Clone, Serialize)]
pub struct TransferPlan {
    source: Locator,
    destination: Locator,
    if_exists: IfExists,
    /// Retries may continue from the last committed byte
    resumable: bool,
    tasks: Vec<TransferTask>,
}

impl TransferPlan {
    pub(crate) fn new(
        source: Locator,
        destination: Locator,
        if_exists: IfExists,
        resumable: bool,
        tasks: Vec<TransferTask>,
    ) -> Self {
        Self {
            source,
            destination,
            if_exists,
            resumable,
            tasks,
        }
    }

    pub fn source(&self) -> &Locator {
        &self.source
    }

    pub fn destination(&self) -> &Locator {
        &self.destination
    }

    pub fn if_exists(&self) -> IfExists {
        self.if_exists
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    pub fn tasks(&self) -> &[TransferTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tasks.iter().map(TransferTask::expected_size).sum()
    }
}
