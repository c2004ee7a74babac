//! Per-batch and per-task execution context.

use tokio_util::sync::CancellationToken;

use crate::error::TaskFailure;

const DEFAULT_PARALLELISM: usize = 5;

/// How a batch walks the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One task at a time, strict queue order, a pause between tasks.
    Sequential,
    /// Up to `max_concurrency` tasks at once. Completion order is not
    /// guaranteed.
    Parallel { max_concurrency: usize },
}

impl BatchMode {
    /// Parallel mode with a sanitized concurrency bound. Values that would
    /// degenerate to sequential execution (0 or 1) fall back to the
    /// default of 5.
    pub fn parallel(max_concurrency: usize) -> Self {
        let max_concurrency = if max_concurrency <= 1 {
            DEFAULT_PARALLELISM
        } else {
            max_concurrency
        };
        Self::Parallel { max_concurrency }
    }
}

/// Everything one task execution needs to know about its run: which task
/// it is and how to notice a stop request. Each execution gets its own
/// context; nothing about the current task is shared between runs.
pub struct ExecContext {
    pub task_id: String,
    cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(task_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            task_id: task_id.into(),
            cancel,
        }
    }

    /// A stop was requested; the execution should not start new work.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What a finished batch looked like. Failure details travel separately in
/// the aggregate error.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Tasks that completed their scenario.
    pub succeeded: usize,
    /// Tasks whose scenario failed.
    pub failed: usize,
    /// Tasks never dispatched because the batch was stopped first.
    pub not_run: usize,
}

impl BatchSummary {
    pub(crate) fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub(crate) fn record_failure(&mut self, failures: &mut Vec<TaskFailure>, failure: TaskFailure) {
        self.failed += 1;
        failures.push(failure);
    }
}
