//! Batch execution over the task queue.
//!
//! A batch executes a caller-supplied ordered list of task ids, either
//! sequentially (strict order, a pause between tasks) or in parallel under
//! a concurrency bound. Every task gets its own browser session and its
//! own [`ExecContext`]; a stop request cancels dispatch but lets in-flight
//! scenarios finish and keep their outcome.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditCategory, AuditEntry, AuditLevel, AuditSink};
use crate::driver::{AutomationDriver, Credentials, DriverOptions, ScenarioOutcome};
use crate::error::{BatchError, Error, Result, TaskFailure};
use crate::exec::context::{BatchMode, BatchSummary, ExecContext};
use crate::store::SettingsStore;
use crate::tasks::model::{Task, TaskStatus};
use crate::tasks::service::TaskService;

const INTER_TASK_PAUSE: Duration = Duration::from_secs(1);

/// Outcome of one task execution inside a batch.
enum TaskRun {
    Completed,
    Failed(TaskFailure),
    /// Dispatch was cancelled before the task started.
    NotRun,
}

/// Marks a task as owned by a live execution for as long as it is held.
struct InFlightGuard<'a> {
    ids: &'a std::sync::Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightGuard<'a> {
    fn enter(ids: &'a std::sync::Mutex<HashSet<String>>, id: &str) -> Self {
        if let Ok(mut set) = ids.lock() {
            set.insert(id.to_string());
        }
        Self {
            ids,
            id: id.to_string(),
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.ids.lock() {
            set.remove(&self.id);
        }
    }
}

/// Runs batches against the queue and owns the stop signal.
pub struct Orchestrator {
    service: Arc<TaskService>,
    settings: Arc<dyn SettingsStore>,
    driver: Arc<dyn AutomationDriver>,
    audit: AuditSink,
    /// Token for the batch currently running. Replaced at every start so a
    /// stop only affects the batch it was aimed at.
    current: Mutex<CancellationToken>,
    /// Ids whose execution is in flight right now; the stop sweep must not
    /// touch these, their outcome is still being decided.
    in_flight: std::sync::Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        service: Arc<TaskService>,
        settings: Arc<dyn SettingsStore>,
        driver: Arc<dyn AutomationDriver>,
        audit: AuditSink,
    ) -> Self {
        Self {
            service,
            settings,
            driver,
            audit,
            current: Mutex::new(CancellationToken::new()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Execute the given task ids once, in the given order.
    ///
    /// Unknown ids fail the whole batch with `Error::NotFound` before
    /// anything is dispatched. Returns the batch summary when all
    /// dispatched tasks completed, `Error::Batch` when some failed, and
    /// `Error::Cancelled` when a stop aborted sequential dispatch.
    pub async fn run_batch(&self, task_ids: &[String], mode: BatchMode) -> Result<BatchSummary> {
        let mut tasks = Vec::with_capacity(task_ids.len());
        for id in task_ids {
            tasks.push(self.service.get_task(id).await?);
        }
        self.run_prepared(tasks, mode).await
    }

    /// Execute every runnable task in queue order.
    pub async fn run_queue(&self, mode: BatchMode) -> Result<BatchSummary> {
        let tasks = self.service.collect_runnable().await?;
        self.run_prepared(tasks, mode).await
    }

    async fn run_prepared(&self, tasks: Vec<Task>, mode: BatchMode) -> Result<BatchSummary> {
        if tasks.is_empty() {
            tracing::info!("No tasks to run, batch is a no-op");
            return Ok(BatchSummary::default());
        }

        let settings = self.settings.get().await?;
        let options = DriverOptions::from_settings(&settings);
        let credentials = Credentials::from_settings(&settings);

        let token = {
            let mut current = self.current.lock().await;
            *current = CancellationToken::new();
            current.clone()
        };

        tracing::info!(tasks = tasks.len(), ?mode, "Batch started");
        self.audit.emit(AuditEntry::new(
            AuditLevel::Info,
            AuditCategory::Automation,
            format!("Batch started: {} task(s)", tasks.len()),
        ));

        let (summary, failures) = match mode {
            BatchMode::Sequential => {
                self.run_sequential(&tasks, &options, &credentials, &token)
                    .await?
            }
            BatchMode::Parallel { max_concurrency } => {
                self.run_parallel(&tasks, &options, &credentials, &token, max_concurrency)
                    .await
            }
        };

        // Synchronous append so the trail is complete when the batch
        // returns.
        self.audit
            .emit_sync(AuditEntry::new(
                AuditLevel::Info,
                AuditCategory::Automation,
                format!(
                    "Batch finished: {} completed, {} failed, {} not run",
                    summary.succeeded, summary.failed, summary.not_run
                ),
            ))
            .await;

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(Error::Batch(BatchError {
                succeeded: summary.succeeded,
                failures,
            }))
        }
    }

    /// Cancel the running batch and return idle `InWork` tasks to the
    /// queue. Tasks whose execution is still in flight are left alone;
    /// their own run records the final status. Safe to call when nothing
    /// is running.
    pub async fn stop(&self) -> Result<usize> {
        self.current.lock().await.cancel();
        let in_flight = self
            .in_flight
            .lock()
            .map(|ids| ids.clone())
            .unwrap_or_default();
        tracing::info!(
            in_flight = in_flight.len(),
            "Stop requested, sweeping idle in-work tasks back to the queue"
        );
        self.service
            .return_in_work_to_waiting_except(&in_flight)
            .await
    }

    async fn run_sequential(
        &self,
        tasks: &[Task],
        options: &DriverOptions,
        credentials: &Credentials,
        token: &CancellationToken,
    ) -> Result<(BatchSummary, Vec<TaskFailure>)> {
        let mut summary = BatchSummary::default();
        let mut failures = Vec::new();

        for (index, task) in tasks.iter().enumerate() {
            if token.is_cancelled() {
                summary.not_run = tasks.len() - index;
                tracing::info!(not_run = summary.not_run, "Sequential batch aborted");
                return Err(Error::Cancelled);
            }
            if index > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(INTER_TASK_PAUSE) => {}
                    _ = token.cancelled() => {
                        summary.not_run = tasks.len() - index;
                        tracing::info!(not_run = summary.not_run, "Sequential batch aborted");
                        return Err(Error::Cancelled);
                    }
                }
            }

            let ctx = ExecContext::new(&task.id, token.child_token());
            match self.execute_one(&ctx, task, options, credentials).await {
                TaskRun::Completed => summary.record_success(),
                TaskRun::Failed(failure) => summary.record_failure(&mut failures, failure),
                TaskRun::NotRun => summary.not_run += 1,
            }
        }

        Ok((summary, failures))
    }

    async fn run_parallel(
        &self,
        tasks: &[Task],
        options: &DriverOptions,
        credentials: &Credentials,
        token: &CancellationToken,
        max_concurrency: usize,
    ) -> (BatchSummary, Vec<TaskFailure>) {
        let semaphore = Arc::new(Semaphore::new(max_concurrency));

        let runs = tasks.iter().map(|task| {
            let semaphore = semaphore.clone();
            let ctx = ExecContext::new(&task.id, token.child_token());
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return TaskRun::NotRun;
                };
                if ctx.is_cancelled() {
                    tracing::debug!(task_id = %ctx.task_id, "Dispatch cancelled before start");
                    return TaskRun::NotRun;
                }
                self.execute_one(&ctx, task, options, credentials).await
            }
        });

        let mut summary = BatchSummary::default();
        let mut failures = Vec::new();
        for run in futures::future::join_all(runs).await {
            match run {
                TaskRun::Completed => summary.record_success(),
                TaskRun::Failed(failure) => summary.record_failure(&mut failures, failure),
                TaskRun::NotRun => summary.not_run += 1,
            }
        }
        (summary, failures)
    }

    /// One task, one session. The session is torn down on every exit path
    /// and the task counts as in flight for the whole run.
    async fn execute_one(
        &self,
        ctx: &ExecContext,
        task: &Task,
        options: &DriverOptions,
        credentials: &Credentials,
    ) -> TaskRun {
        if ctx.is_cancelled() {
            tracing::debug!(task_id = %ctx.task_id, "Dispatch cancelled before start");
            return TaskRun::NotRun;
        }
        let _in_flight = InFlightGuard::enter(&self.in_flight, &ctx.task_id);

        if let Err(e) = self.service.set_status(&task.id, TaskStatus::InWork).await {
            return TaskRun::Failed(TaskFailure {
                task_id: task.id.clone(),
                reason: e.to_string(),
            });
        }
        self.audit
            .emit(AuditEntry::task_event(&task.id, "Execution started"));

        if let Err(e) = self.service.decrement_attempts(&task.id).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to record spent attempt");
        }

        let mut session = match self.driver.open(options).await {
            Ok(session) => session,
            Err(e) => {
                return self.finish_failed(task, e.to_string()).await;
            }
        };

        let result = match session.authenticate(credentials).await {
            Ok(()) => session.run_scenario(task).await,
            Err(e) => Err(e),
        };

        if let Err(e) = session.close().await {
            tracing::warn!(task_id = %task.id, error = %e, "Session teardown failed");
        }

        match result {
            Ok(outcome) => self.finish_completed(task, outcome).await,
            Err(e) => self.finish_failed(task, e.to_string()).await,
        }
    }

    async fn finish_completed(&self, task: &Task, outcome: ScenarioOutcome) -> TaskRun {
        // A booking the portal accepted must never be reported as anything
        // but completed; a failed status write is a batch failure, not a
        // log line.
        if let Err(e) = self
            .service
            .set_status(&task.id, TaskStatus::Completed)
            .await
        {
            tracing::error!(task_id = %task.id, error = %e, "Failed to record completed status");
            return TaskRun::Failed(TaskFailure {
                task_id: task.id.clone(),
                reason: format!("scenario succeeded but the completed status was not recorded: {e}"),
            });
        }
        let details = match &outcome.booked_slot {
            Some(slot) => format!("slot: {slot}"),
            None => outcome.message.clone(),
        };
        tracing::info!(task_id = %task.id, "Task completed");
        self.audit
            .emit(AuditEntry::task_event(&task.id, "Scenario completed").with_details(details));
        TaskRun::Completed
    }

    async fn finish_failed(&self, task: &Task, reason: String) -> TaskRun {
        if let Err(e) = self.service.set_status(&task.id, TaskStatus::Skipped).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to mark task skipped");
        }
        tracing::warn!(task_id = %task.id, reason = %reason, "Task failed");
        self.audit.emit(
            AuditEntry::error_event(AuditCategory::Automation, "Scenario failed", &reason)
                .with_task(&task.id),
        );
        TaskRun::Failed(TaskFailure {
            task_id: task.id.clone(),
            reason,
        })
    }
}
