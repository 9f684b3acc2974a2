//! Transfer execution
//!
//! Runs every task of a [`TransferPlan`] to a terminal state with bounded
//! concurrency. A task's failure is recorded in its report entry and never
//! stops its siblings; `execute` itself cannot fail.

use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::capability::IfExists;
use crate::client::{BackendClient, ByteStream, ObjectDescriptor, ObjectSink};
use crate::error::{Error, Result};
use crate::planner::Endpoint;
use crate::report::{ReportCollector, TaskReport, TransferReport};
use crate::retry::{RetryConfig, calculate_backoff, retry_with_backoff};
use crate::task::{FailureKind, TaskState, TransferPlan, TransferTask};

/// Callback invoked once per finished task
pub type ProgressFn = Arc<dyn Fn(&TaskReport) + Send + Sync>;

/// Tuning for the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub retry: RetryConfig,
    /// Objects larger than this are streamed instead of buffered whole
    pub stream_threshold: u64,
    /// Bytes handed to the destination per write while streaming
    pub chunk_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            stream_threshold: 8 * 1024 * 1024,
            chunk_size: 1024 * 1024,
        }
    }
}

/// Source and destination clients a plan runs against
#[derive(Clone)]
pub struct TransferRoute {
    source: Arc<dyn BackendClient>,
    destination: Arc<dyn BackendClient>,
}

impl TransferRoute {
    pub fn new(source: Arc<dyn BackendClient>, destination: Arc<dyn BackendClient>) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Route between the clients of two planned endpoints
    pub fn between(source: &Endpoint, destination: &Endpoint) -> Self {
        Self::new(source.client.clone(), destination.client.clone())
    }
}

enum Existing {
    Write,
    Skip,
}

struct Outcome {
    state: TaskState,
    attempts: u32,
    bytes: u64,
    error: Option<Error>,
}

/// Runs transfer plans
pub struct TransferExecutor {
    route: TransferRoute,
    config: ExecutorConfig,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl TransferExecutor {
    pub fn new(route: TransferRoute) -> Self {
        Self {
            route,
            config: ExecutorConfig::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Run-level cancellation signal
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run every task and return one report entry per task, in plan order
    ///
    /// `concurrency` of zero is treated as one.
    pub async fn execute(&self, plan: &TransferPlan, concurrency: usize) -> TransferReport {
        let concurrency = concurrency.max(1);
        let mut collector = ReportCollector::new(plan.len());

        tracing::info!(
            tasks = plan.len(),
            concurrency,
            resumable = plan.is_resumable(),
            "Starting transfer"
        );

        let mut finished = stream::iter(plan.tasks().iter().cloned())
            .map(|task| self.run_task(task, plan.if_exists(), plan.is_resumable()))
            .buffer_unordered(concurrency);

        while let Some(report) = finished.next().await {
            if let Some(progress) = &self.progress {
                progress(&report);
            }
            collector.record(report);
        }

        let report = collector.finish(plan, self.cancel.is_cancelled());

        tracing::info!(
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            cancelled = report.cancelled_tasks(),
            bytes = report.total_bytes(),
            "Transfer finished"
        );

        report
    }

    async fn run_task(&self, mut task: TransferTask, if_exists: IfExists, resume: bool) -> TaskReport {
        // No new tasks once cancelled
        if self.cancel.is_cancelled() {
            task.set_state(TaskState::Cancelled);
            return TaskReport::new(&task, 0, 0, None);
        }

        task.set_state(TaskState::InFlight);
        tracing::debug!(
            index = task.index(),
            source = %task.source(),
            destination = %task.destination(),
            "Task started"
        );

        let outcome = match self.check_existing(&task, if_exists).await {
            Ok(Existing::Skip) => Outcome {
                state: TaskState::Skipped,
                attempts: 0,
                bytes: 0,
                error: None,
            },
            Ok(Existing::Write) => self.transfer_with_retry(&task, resume).await,
            Err(e) => Outcome {
                state: TaskState::Failed(FailureKind::Fatal),
                attempts: 0,
                bytes: 0,
                error: Some(e),
            },
        };

        task.set_state(outcome.state);
        match (&outcome.error, outcome.state) {
            (Some(e), TaskState::Failed(kind)) => tracing::warn!(
                index = task.index(),
                source = %task.source(),
                attempts = outcome.attempts,
                ?kind,
                error = %e,
                "Task failed"
            ),
            _ => tracing::debug!(
                index = task.index(),
                state = ?outcome.state,
                attempts = outcome.attempts,
                bytes = outcome.bytes,
                "Task finished"
            ),
        }

        TaskReport::new(
            &task,
            outcome.attempts,
            outcome.bytes,
            outcome.error.map(|e| e.to_string()),
        )
    }

    /// Apply the plan's if-exists mode to the destination object
    async fn check_existing(&self, task: &TransferTask, if_exists: IfExists) -> Result<Existing> {
        if if_exists == IfExists::Overwrite {
            return Ok(Existing::Write);
        }

        let client = &self.route.destination;
        let key = task.destination().path();
        let Some(existing) =
            retry_with_backoff(&self.config.retry, move || client.stat(key), Error::is_retryable)
                .await?
        else {
            return Ok(Existing::Write);
        };

        match if_exists {
            IfExists::Skip => {
                let mut incoming = ObjectDescriptor::new(task.source().path(), task.expected_size());
                incoming.etag = task.etag().map(str::to_string);
                if existing.same_content(&incoming) {
                    Ok(Existing::Skip)
                } else {
                    Ok(Existing::Write)
                }
            }
            IfExists::Error => Err(Error::AlreadyExists(task.destination().to_string())),
            IfExists::Overwrite => Ok(Existing::Write),
        }
    }

    async fn transfer_with_retry(&self, task: &TransferTask, resume: bool) -> Outcome {
        let retry = &self.config.retry;
        let mut attempts = 0;
        let mut committed = 0;

        loop {
            attempts += 1;
            let offset = if resume { committed } else { 0 };
            let mut written = offset;

            let error = match self.attempt(task, offset, &mut written).await {
                Ok(bytes) => {
                    return Outcome {
                        state: TaskState::Succeeded,
                        attempts,
                        bytes,
                        error: None,
                    };
                }
                Err(e) => e,
            };

            let state = match &error {
                Error::Cancelled => Some(TaskState::Cancelled),
                e if !e.is_retryable() => Some(TaskState::Failed(FailureKind::Fatal)),
                _ if attempts >= retry.max_attempts.max(1) => {
                    Some(TaskState::Failed(FailureKind::Fatal))
                }
                _ => None,
            };
            if let Some(state) = state {
                return Outcome {
                    state,
                    attempts,
                    bytes: written,
                    error: Some(error),
                };
            }

            committed = written;
            let backoff = calculate_backoff(retry, attempts);
            tracing::debug!(
                index = task.index(),
                attempt = attempts,
                backoff_ms = backoff.as_millis(),
                resume_from = if resume { committed } else { 0 },
                error = %error,
                "Retrying after transient error"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Outcome {
                        state: TaskState::Failed(FailureKind::Retryable),
                        attempts,
                        bytes: committed,
                        error: Some(error),
                    };
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// One read-write pass starting at `offset`
    ///
    /// `written` tracks bytes the destination has accepted so a retry can
    /// resume after them.
    async fn attempt(&self, task: &TransferTask, offset: u64, written: &mut u64) -> Result<u64> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let reader = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            opened = self.route.source.open_read(task.source().path(), offset) => opened?,
        };
        let mut sink = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            opened = self.route.destination.open_write(task.destination().path(), offset) => opened?,
        };

        if let Err(e) = self.pump(task, reader, sink.as_mut(), written).await {
            if let Err(abort_err) = sink.abort().await {
                tracing::warn!(
                    destination = %task.destination(),
                    error = %abort_err,
                    "Failed to abort destination write"
                );
            }
            return Err(e);
        }

        let total = sink.finish().await?;
        *written = total;
        if total != task.expected_size() {
            return Err(Error::Integrity(format!(
                "{}: expected {} bytes, destination holds {total}",
                task.destination(),
                task.expected_size()
            )));
        }
        Ok(total)
    }

    /// Move bytes from `reader` into `sink`, racing each read against cancellation
    async fn pump(
        &self,
        task: &TransferTask,
        mut reader: ByteStream,
        sink: &mut dyn ObjectSink,
        written: &mut u64,
    ) -> Result<()> {
        // Small objects are written in a single call
        let flush_at = if task.expected_size() <= self.config.stream_threshold {
            usize::MAX
        } else {
            self.config.chunk_size.max(1)
        };
        let mut pending = BytesMut::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                next = reader.next() => next,
            };

            match next {
                Some(chunk) => {
                    pending.extend_from_slice(&chunk?);
                    if pending.len() >= flush_at {
                        let buf = pending.split().freeze();
                        let len = buf.len() as u64;
                        sink.write(buf).await?;
                        *written += len;
                    }
                }
                None => break,
            }
        }

        if !pending.is_empty() {
            let buf = pending.freeze();
            let len = buf.len() as u64;
            sink.write(buf).await?;
            *written += len;
        }

        Ok(())
    }
}
