//! Store interfaces — one async trait per persisted collection.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::audit::AuditEntry;
use crate::error::StorageError;
use crate::references::{ReferenceBook, ReferenceItem, ReferenceKind};
use crate::settings::Settings;
use crate::tasks::model::{Task, TaskStatus};

/// Persistence for the task queue.
///
/// All mutating operations are mutually exclusive per store: each one runs
/// a full load → mutate → atomic-rewrite cycle under an exclusive lock, so
/// readers only ever observe committed whole-collection snapshots.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert by id. A task not yet in the store is assigned
    /// `position = max(existing) + 1`. Returns the task as persisted.
    async fn save(&self, task: &Task) -> Result<Task, StorageError>;

    /// Look up one task. `None` for an unknown id.
    async fn get_by_id(&self, id: &str) -> Result<Option<Task>, StorageError>;

    /// All tasks, ascending by position.
    async fn get_all(&self) -> Result<Vec<Task>, StorageError>;

    /// Remove by id. Deleting an absent id is a no-op, not an error.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Bulk-reassign positions in one atomic cycle. Ids absent from the
    /// map are untouched; touched tasks get a fresh `updated_at`.
    async fn update_positions(&self, positions: &HashMap<String, i64>)
    -> Result<(), StorageError>;

    /// Tasks currently in `status`, ascending by position.
    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StorageError>;

    /// Tasks flagged `active`, ascending by position.
    async fn get_active_in_order(&self) -> Result<Vec<Task>, StorageError>;
}

/// Persistence for the settings singleton.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings; defaults if none were ever saved.
    async fn get(&self) -> Result<Settings, StorageError>;

    async fn save(&self, settings: &Settings) -> Result<(), StorageError>;
}

/// Persistence for the reference catalogs.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn get(&self) -> Result<ReferenceBook, StorageError>;

    async fn save(&self, book: &ReferenceBook) -> Result<(), StorageError>;

    /// Validate and append one catalog item atomically.
    ///
    /// Fails with `Error::Validation` for empty/duplicate/oversized values
    /// and `Error::Storage` for persistence failures.
    async fn add_item(
        &self,
        kind: ReferenceKind,
        value: &str,
        description: &str,
    ) -> crate::error::Result<ReferenceItem>;

    /// Remove one catalog item atomically. `false` if the id was unknown.
    async fn remove_item(&self, kind: ReferenceKind, item_id: &str) -> Result<bool, StorageError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one entry.
    async fn append(&self, entry: &AuditEntry) -> Result<(), StorageError>;

    /// The most recent `count` entries, oldest first.
    async fn recent(&self, count: usize) -> Result<Vec<AuditEntry>, StorageError>;

    /// All entries for one task, oldest first.
    async fn for_task(&self, task_id: &str) -> Result<Vec<AuditEntry>, StorageError>;
}
