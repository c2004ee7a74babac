//! Task entity and status state machine.

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Generate a creation-ordered task id: timestamp prefix + random suffix.
///
/// The timestamp prefix keeps ids sortable by creation time; the suffix
/// disambiguates tasks created within the same second.
pub fn generate_task_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{timestamp}_{suffix}")
}

/// The kind of terminal operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Bring a container into the terminal.
    Import,
    /// Take a container out of the terminal.
    Export,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Import => "import",
            Self::Export => "export",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Freshly created, never queued.
    New,
    /// Queued for execution.
    Waiting,
    /// A driver session is currently working this task.
    InWork,
    /// Scenario finished successfully.
    Completed,
    /// Scenario or pre-run validation failed.
    Skipped,
    /// Aborted by an operator stop request.
    Stopped,
}

impl TaskStatus {
    /// Check whether the state machine allows moving to `target`.
    ///
    /// Terminal statuses have no outgoing edges here; a caller returns a
    /// finished task to the queue through [`Task::reset_to_waiting`].
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (New, Waiting) | (New, InWork) |
            (Waiting, InWork) | (Waiting, Stopped) |
            // Stop sweep returns queued work; Stopped aborts the current run.
            (InWork, Completed) | (InWork, Skipped) | (InWork, Stopped) | (InWork, Waiting)
        )
    }

    /// Terminal for the current execution cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Stopped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Waiting => "waiting",
            Self::InWork => "in_work",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

fn default_cancel_after_minutes() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    60
}

fn default_retry_delay_seconds() -> u32 {
    60
}

/// One queued slot-booking job.
///
/// `active` is independent of `status`: it marks whether the task is
/// enqueued for automatic execution at all. A completed task can stay
/// active; an inactive task is never picked up by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, creation-ordered id.
    pub id: String,
    /// Eligible for automatic execution.
    #[serde(default)]
    pub active: bool,
    /// Import or export operation.
    pub kind: TaskKind,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Booking date (value from the schedule, validated against catalogs).
    #[serde(default)]
    pub schedule_date: String,
    /// Booking time slot, e.g. "08:00-12:00".
    #[serde(default)]
    pub time_slot: String,
    /// Vehicle registration plate.
    #[serde(default)]
    pub vehicle_plate: String,
    /// Driver name.
    #[serde(default)]
    pub driver: String,
    /// Pickup/dropoff place.
    #[serde(default)]
    pub place: String,
    /// Container index prefix.
    #[serde(default)]
    pub container_index: String,
    /// Container number.
    #[serde(default)]
    pub container_number: String,
    /// Release order reference.
    #[serde(default)]
    pub release_order: String,
    /// Contract with the terminal.
    #[serde(default)]
    pub terminal_contract: String,
    /// Give up on the booking after this many minutes.
    #[serde(default = "default_cancel_after_minutes")]
    pub cancel_after_minutes: u32,
    /// Total attempt budget.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Attempts left; only decreases except via explicit reset.
    #[serde(default = "default_max_attempts")]
    pub remaining_attempts: u32,
    /// Pause between retries.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u32,
    /// FIFO execution order; unique per store, assigned on insert.
    #[serde(default)]
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with default budgets and `New` status.
    pub fn new(kind: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: generate_task_id(),
            active: false,
            kind,
            status: TaskStatus::New,
            schedule_date: String::new(),
            time_slot: String::new(),
            vehicle_plate: String::new(),
            driver: String::new(),
            place: String::new(),
            container_index: String::new(),
            container_number: String::new(),
            release_order: String::new(),
            terminal_contract: String::new(),
            cancel_after_minutes: default_cancel_after_minutes(),
            max_attempts: default_max_attempts(),
            remaining_attempts: default_max_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh `updated_at`. Every mutation goes through this.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check that the required payload fields are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schedule_date.is_empty() {
            return Err(ValidationError::MissingField {
                field: "schedule_date",
            });
        }
        if self.time_slot.is_empty() {
            return Err(ValidationError::MissingField { field: "time_slot" });
        }
        if self.vehicle_plate.is_empty() {
            return Err(ValidationError::MissingField {
                field: "vehicle_plate",
            });
        }
        if self.driver.is_empty() {
            return Err(ValidationError::MissingField { field: "driver" });
        }
        Ok(())
    }

    /// Whether the orchestrator may execute this task right now.
    pub fn can_execute(&self) -> bool {
        self.active
            && self.status == TaskStatus::Waiting
            && self.remaining_attempts > 0
            && self.validate().is_ok()
    }

    /// Move to `target` via the state machine.
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(target) {
            return Err(ValidationError::InvalidValue {
                field: "status",
                message: format!("cannot transition from {} to {}", self.status, target),
            });
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    /// Manual reset: return a terminal task to the queue.
    ///
    /// This is the one deliberate bypass of the transition table; the
    /// entity persists across execution cycles and operators re-queue it
    /// from the outside.
    pub fn reset_to_waiting(&mut self) {
        self.status = TaskStatus::Waiting;
        self.touch();
    }

    /// Spend one attempt from the retry budget. Saturates at zero.
    pub fn decrement_attempts(&mut self) {
        self.remaining_attempts = self.remaining_attempts.saturating_sub(1);
        self.touch();
    }

    /// Restore the full attempt budget.
    pub fn reset_attempts(&mut self) {
        self.remaining_attempts = self.max_attempts;
        self.touch();
    }
}
