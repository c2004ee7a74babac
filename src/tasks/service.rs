//! Task management facade — the operations exposed to API/CLI callers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::audit::{AuditCategory, AuditEntry, AuditSink};
use crate::error::{Error, Result};
use crate::references::{ReferenceItem, ReferenceKind};
use crate::store::{ReferenceStore, SettingsStore, TaskStore};
use crate::tasks::model::{Task, TaskStatus};

/// CRUD, ordering and status bookkeeping over the task queue.
///
/// Every operator-facing mutation leaves a user-action entry in the audit
/// trail; internal status changes leave task-execution entries.
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    settings: Arc<dyn SettingsStore>,
    references: Arc<dyn ReferenceStore>,
    audit: AuditSink,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        settings: Arc<dyn SettingsStore>,
        references: Arc<dyn ReferenceStore>,
        audit: AuditSink,
    ) -> Self {
        Self {
            tasks,
            settings,
            references,
            audit,
        }
    }

    /// Validate and store a new task.
    ///
    /// Zero attempt/delay budgets are filled from the settings defaults
    /// before the task is persisted.
    pub async fn create_task(&self, mut task: Task) -> Result<Task> {
        if let Err(e) = self.validate_payload(&task).await {
            self.audit.emit(AuditEntry::error_event(
                AuditCategory::TaskExecution,
                "New task failed validation",
                &e,
            ));
            return Err(e);
        }

        if task.max_attempts == 0 || task.retry_delay_seconds == 0 {
            let defaults = self.settings.get().await?;
            if task.max_attempts == 0 {
                task.max_attempts = defaults.default_max_attempts;
                task.remaining_attempts = defaults.default_max_attempts;
            }
            if task.retry_delay_seconds == 0 {
                task.retry_delay_seconds = defaults.default_retry_delay_seconds;
            }
        }

        let saved = self.tasks.save(&task).await?;
        tracing::info!(task_id = %saved.id, kind = %saved.kind, "Task created");
        self.audit.emit(
            AuditEntry::user_action(
                format!("Created {} task", saved.kind),
                format!(
                    "date: {}, slot: {}, plate: {}",
                    saved.schedule_date, saved.time_slot, saved.vehicle_plate
                ),
            )
            .with_task(&saved.id),
        );
        Ok(saved)
    }

    /// Update an existing task. The stored `created_at` is preserved.
    pub async fn update_task(&self, mut task: Task) -> Result<Task> {
        let existing = self.get_task(&task.id).await?;

        if let Err(e) = self.validate_payload(&task).await {
            self.audit.emit(AuditEntry::error_event(
                AuditCategory::TaskExecution,
                "Task update failed validation",
                &e,
            ));
            return Err(e);
        }

        task.created_at = existing.created_at;
        let saved = self.tasks.save(&task).await?;
        self.audit.emit(
            AuditEntry::user_action(format!("Updated {} task", saved.kind), "")
                .with_task(&saved.id),
        );
        Ok(saved)
    }

    /// Delete by id. Unknown ids are a `NotFound` error at this level
    /// (the store-level delete underneath is idempotent).
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let task = self.get_task(id).await?;
        self.tasks.delete(id).await?;
        self.audit
            .emit(AuditEntry::user_action(format!("Deleted {} task", task.kind), "").with_task(id));
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.tasks
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::task_not_found(id))
    }

    /// All tasks, FIFO order.
    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.get_all().await?)
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self.tasks.get_by_status(status).await?)
    }

    /// Active tasks in execution order.
    pub async fn list_active_in_order(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.get_active_in_order().await?)
    }

    /// Active tasks that are actually runnable right now (queued, with
    /// attempt budget and a complete payload), in execution order.
    pub async fn collect_runnable(&self) -> Result<Vec<Task>> {
        let mut tasks = self.tasks.get_active_in_order().await?;
        tasks.retain(|t| t.can_execute());
        Ok(tasks)
    }

    /// Flip the `active` flag.
    pub async fn toggle_active(&self, id: &str) -> Result<Task> {
        let mut task = self.get_task(id).await?;
        task.active = !task.active;
        let saved = self.tasks.save(&task).await?;
        let verb = if saved.active { "activated" } else { "deactivated" };
        self.audit
            .emit(AuditEntry::user_action(format!("Task {verb}"), "").with_task(id));
        Ok(saved)
    }

    /// Bulk position reassignment.
    pub async fn reorder_tasks(&self, positions: &HashMap<String, i64>) -> Result<()> {
        self.tasks.update_positions(positions).await?;
        self.audit.emit(AuditEntry::user_action(
            "Reordered task queue",
            format!("{} position(s) updated", positions.len()),
        ));
        Ok(())
    }

    /// Move a task through the state machine and persist it.
    pub async fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let mut task = self.get_task(id).await?;
        let previous = task.status;
        task.transition_to(status)?;
        let saved = self.tasks.save(&task).await?;
        tracing::debug!(task_id = %id, from = %previous, to = %status, "Task status changed");
        self.audit.emit(AuditEntry::task_event(
            id,
            format!("Status changed: {previous} -> {status}"),
        ));
        Ok(saved)
    }

    /// Spend one attempt from the task's retry budget.
    pub async fn decrement_attempts(&self, id: &str) -> Result<Task> {
        let mut task = self.get_task(id).await?;
        task.decrement_attempts();
        let saved = self.tasks.save(&task).await?;
        self.audit.emit(AuditEntry::task_event(
            id,
            format!("Attempts remaining: {}", saved.remaining_attempts),
        ));
        Ok(saved)
    }

    /// Manual operator reset: re-queue a finished task with a fresh
    /// attempt budget.
    pub async fn reset_task(&self, id: &str) -> Result<Task> {
        let mut task = self.get_task(id).await?;
        task.reset_to_waiting();
        task.reset_attempts();
        let saved = self.tasks.save(&task).await?;
        self.audit
            .emit(AuditEntry::user_action("Task re-queued", "").with_task(id));
        Ok(saved)
    }

    /// Run start sweep: move every runnable task to `InWork` and return
    /// them in execution order.
    pub async fn mark_waiting_in_work(&self) -> Result<Vec<Task>> {
        let runnable = self.collect_runnable().await?;
        let mut marked = Vec::with_capacity(runnable.len());
        for mut task in runnable {
            task.transition_to(TaskStatus::InWork)?;
            marked.push(self.tasks.save(&task).await?);
        }
        if !marked.is_empty() {
            self.audit.emit(AuditEntry::user_action(
                "Execution started",
                format!("{} task(s) taken into work", marked.len()),
            ));
        }
        Ok(marked)
    }

    /// Stop sweep: return every `InWork` task to `Waiting`. Idempotent;
    /// a failure on one task does not keep the sweep from the rest.
    pub async fn return_in_work_to_waiting(&self) -> Result<usize> {
        self.return_in_work_to_waiting_except(&HashSet::new()).await
    }

    /// Stop sweep that leaves the given ids alone. Used when executions
    /// are still in flight; their runs record the final status themselves.
    pub async fn return_in_work_to_waiting_except(
        &self,
        exclude: &HashSet<String>,
    ) -> Result<usize> {
        let in_work = self.tasks.get_by_status(TaskStatus::InWork).await?;
        let mut returned = 0;
        for mut task in in_work {
            if exclude.contains(&task.id) {
                continue;
            }
            if let Err(e) = task.transition_to(TaskStatus::Waiting) {
                tracing::warn!(task_id = %task.id, error = %e, "Stop sweep skipped task");
                continue;
            }
            match self.tasks.save(&task).await {
                Ok(_) => returned += 1,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "Stop sweep failed to save task");
                }
            }
        }
        if returned > 0 {
            self.audit.emit(AuditEntry::user_action(
                "Execution stopped",
                format!("{returned} task(s) returned to queue"),
            ));
        }
        Ok(returned)
    }

    /// Add a catalog value, addressing the catalog by its string key
    /// (`"drivers"`, `"time_slots"`, ...). Unknown keys are rejected.
    pub async fn add_reference_value(
        &self,
        catalog_key: &str,
        value: &str,
        description: &str,
    ) -> Result<ReferenceItem> {
        let kind = ReferenceKind::from_key(catalog_key)?;
        let item = self.references.add_item(kind, value, description).await?;
        self.audit.emit(AuditEntry::user_action(
            format!("Added {kind} entry"),
            format!("value: {}", item.value),
        ));
        Ok(item)
    }

    /// Remove a catalog item by id, addressing the catalog by its string
    /// key. Returns whether anything was removed.
    pub async fn remove_reference_value(&self, catalog_key: &str, item_id: &str) -> Result<bool> {
        let kind = ReferenceKind::from_key(catalog_key)?;
        let removed = self.references.remove_item(kind, item_id).await?;
        if removed {
            self.audit.emit(AuditEntry::user_action(
                format!("Removed {kind} entry"),
                format!("id: {item_id}"),
            ));
        }
        Ok(removed)
    }

    /// Payload completeness plus reference-catalog checks.
    async fn validate_payload(&self, task: &Task) -> Result<()> {
        task.validate()?;

        let book = self.references.get().await?;
        book.validate_value(ReferenceKind::TimeSlots, &task.time_slot)?;
        book.validate_value(ReferenceKind::VehiclePlates, &task.vehicle_plate)?;
        book.validate_value(ReferenceKind::Drivers, &task.driver)?;
        if !task.terminal_contract.is_empty() {
            book.validate_value(ReferenceKind::TerminalContracts, &task.terminal_contract)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::error::ValidationError;
    use crate::store::{AuditStore, JsonStore};
    use crate::tasks::model::TaskKind;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<JsonStore>,
        service: TaskService,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::open(dir.path()).await.unwrap());
        let service = TaskService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            AuditSink::new(store.clone()),
        );
        Fixture {
            _dir: dir,
            store,
            service,
        }
    }

    fn valid_task() -> Task {
        let mut task = Task::new(TaskKind::Import);
        task.schedule_date = "2025-09-01".into();
        task.time_slot = "08:00-12:00".into();
        task.vehicle_plate = "A001AA78".into();
        task.driver = "I. Ivanov".into();
        task
    }

    #[tokio::test]
    async fn create_assigns_position_and_persists() {
        let fx = fixture().await;
        let first = fx.service.create_task(valid_task()).await.unwrap();
        let second = fx.service.create_task(valid_task()).await.unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);
    }

    #[tokio::test]
    async fn create_rejects_missing_fields() {
        let fx = fixture().await;
        let err = fx
            .service
            .create_task(Task::new(TaskKind::Export))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingField { .. })
        ));
    }

    #[tokio::test]
    async fn create_rejects_unknown_catalog_values() {
        let fx = fixture().await;
        let mut task = valid_task();
        task.vehicle_plate = "Z999ZZ99".into();
        let err = fx.service.create_task(task).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownReference { .. })
        ));
    }

    #[tokio::test]
    async fn create_fills_budgets_from_settings() {
        let fx = fixture().await;
        let mut task = valid_task();
        task.max_attempts = 0;
        task.remaining_attempts = 0;
        task.retry_delay_seconds = 0;
        let saved = fx.service.create_task(task).await.unwrap();
        assert_eq!(saved.max_attempts, 60);
        assert_eq!(saved.remaining_attempts, 60);
        assert_eq!(saved.retry_delay_seconds, 60);
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let fx = fixture().await;
        let created = fx.service.create_task(valid_task()).await.unwrap();

        let mut changed = created.clone();
        changed.created_at = chrono::Utc::now();
        changed.place = "Gate 2".into();
        let updated = fx.service.update_task(changed).await.unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.place, "Gate 2");
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let fx = fixture().await;
        let err = fx.service.delete_task("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn toggle_active_flips_flag() {
        let fx = fixture().await;
        let task = fx.service.create_task(valid_task()).await.unwrap();
        assert!(!task.active);
        let toggled = fx.service.toggle_active(&task.id).await.unwrap();
        assert!(toggled.active);
        let toggled = fx.service.toggle_active(&task.id).await.unwrap();
        assert!(!toggled.active);
    }

    #[tokio::test]
    async fn set_status_enforces_state_machine() {
        let fx = fixture().await;
        let task = fx.service.create_task(valid_task()).await.unwrap();

        fx.service
            .set_status(&task.id, TaskStatus::Waiting)
            .await
            .unwrap();
        let err = fx
            .service
            .set_status(&task.id, TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn collect_runnable_skips_inactive_and_exhausted() {
        let fx = fixture().await;

        let runnable = fx.service.create_task(valid_task()).await.unwrap();
        fx.service.toggle_active(&runnable.id).await.unwrap();
        fx.service
            .set_status(&runnable.id, TaskStatus::Waiting)
            .await
            .unwrap();

        // Active but exhausted budget.
        let exhausted = fx.service.create_task(valid_task()).await.unwrap();
        fx.service.toggle_active(&exhausted.id).await.unwrap();
        fx.service
            .set_status(&exhausted.id, TaskStatus::Waiting)
            .await
            .unwrap();
        let mut t = fx.service.get_task(&exhausted.id).await.unwrap();
        t.remaining_attempts = 0;
        TaskStore::save(fx.store.as_ref(), &t).await.unwrap();

        // Queued but inactive.
        let inactive = fx.service.create_task(valid_task()).await.unwrap();
        fx.service
            .set_status(&inactive.id, TaskStatus::Waiting)
            .await
            .unwrap();

        let ids: Vec<String> = fx
            .service
            .collect_runnable()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![runnable.id]);
    }

    #[tokio::test]
    async fn reset_task_requeues_with_full_budget() {
        let fx = fixture().await;
        let task = fx.service.create_task(valid_task()).await.unwrap();
        fx.service
            .set_status(&task.id, TaskStatus::Waiting)
            .await
            .unwrap();
        fx.service
            .set_status(&task.id, TaskStatus::InWork)
            .await
            .unwrap();
        fx.service.decrement_attempts(&task.id).await.unwrap();
        fx.service
            .set_status(&task.id, TaskStatus::Completed)
            .await
            .unwrap();

        let reset = fx.service.reset_task(&task.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Waiting);
        assert_eq!(reset.remaining_attempts, reset.max_attempts);
    }

    #[tokio::test]
    async fn start_sweep_takes_runnable_tasks_into_work() {
        let fx = fixture().await;
        let queued = fx.service.create_task(valid_task()).await.unwrap();
        fx.service.toggle_active(&queued.id).await.unwrap();
        fx.service
            .set_status(&queued.id, TaskStatus::Waiting)
            .await
            .unwrap();
        // Inactive task stays out of the sweep.
        let idle = fx.service.create_task(valid_task()).await.unwrap();
        fx.service
            .set_status(&idle.id, TaskStatus::Waiting)
            .await
            .unwrap();

        let marked = fx.service.mark_waiting_in_work().await.unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].id, queued.id);
        assert_eq!(marked[0].status, TaskStatus::InWork);
        assert_eq!(
            fx.service.get_task(&idle.id).await.unwrap().status,
            TaskStatus::Waiting
        );
    }

    #[tokio::test]
    async fn stop_sweep_returns_in_work_tasks() {
        let fx = fixture().await;
        for _ in 0..2 {
            let task = fx.service.create_task(valid_task()).await.unwrap();
            fx.service
                .set_status(&task.id, TaskStatus::Waiting)
                .await
                .unwrap();
            fx.service
                .set_status(&task.id, TaskStatus::InWork)
                .await
                .unwrap();
        }
        let completed = fx.service.create_task(valid_task()).await.unwrap();
        fx.service
            .set_status(&completed.id, TaskStatus::Waiting)
            .await
            .unwrap();

        assert_eq!(fx.service.return_in_work_to_waiting().await.unwrap(), 2);
        assert!(
            fx.service
                .get_tasks_by_status(TaskStatus::InWork)
                .await
                .unwrap()
                .is_empty()
        );
        // Sweep is idempotent.
        assert_eq!(fx.service.return_in_work_to_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_sweep_leaves_excluded_ids_in_work() {
        let fx = fixture().await;
        let mut ids = Vec::new();
        for _ in 0..2 {
            let task = fx.service.create_task(valid_task()).await.unwrap();
            fx.service
                .set_status(&task.id, TaskStatus::Waiting)
                .await
                .unwrap();
            fx.service
                .set_status(&task.id, TaskStatus::InWork)
                .await
                .unwrap();
            ids.push(task.id);
        }

        let exclude = HashSet::from([ids[0].clone()]);
        let returned = fx
            .service
            .return_in_work_to_waiting_except(&exclude)
            .await
            .unwrap();
        assert_eq!(returned, 1);
        assert_eq!(
            fx.service.get_task(&ids[0]).await.unwrap().status,
            TaskStatus::InWork
        );
        assert_eq!(
            fx.service.get_task(&ids[1]).await.unwrap().status,
            TaskStatus::Waiting
        );
    }

    #[tokio::test]
    async fn reference_values_addressed_by_catalog_key() {
        let fx = fixture().await;
        let item = fx
            .service
            .add_reference_value("drivers", "N. Novikov", "relief shift")
            .await
            .unwrap();
        assert_eq!(item.value, "N. Novikov");

        assert!(
            fx.service
                .remove_reference_value("drivers", &item.id)
                .await
                .unwrap()
        );

        let err = fx
            .service
            .add_reference_value("warehouses", "W1", "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownCatalog { .. })
        ));
    }

    #[tokio::test]
    async fn user_actions_reach_the_audit_trail() {
        let fx = fixture().await;
        let task = fx.service.create_task(valid_task()).await.unwrap();
        // Audit writes are fire-and-forget; give the spawned append a tick.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let entries = fx.store.for_task(&task.id).await.unwrap();
        assert!(entries.iter().any(|e| e.user_action));
    }
}
