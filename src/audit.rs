//! Persisted audit trail — user actions and execution events.
//!
//! This is the domain-visible event log (what operators see in the UI),
//! separate from operational `tracing` output. Entries are appended
//! fire-and-forget: a failed append is logged and swallowed, it never
//! fails the operation that produced it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::store::AuditStore;

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What part of the system produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    UserAction,
    TaskExecution,
    Automation,
    Settings,
    References,
    Storage,
    Connection,
    System,
}

fn generate_audit_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S%.6f");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!("log_{timestamp}_{suffix}")
}

/// One entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub category: AuditCategory,
    pub message: String,
    #[serde(default)]
    pub details: String,
    /// Task this entry belongs to, empty for system-wide events.
    #[serde(default)]
    pub task_id: String,
    /// Entry was caused directly by an operator.
    #[serde(default)]
    pub user_action: bool,
    #[serde(default)]
    pub error: String,
}

impl AuditEntry {
    pub fn new(level: AuditLevel, category: AuditCategory, message: impl Into<String>) -> Self {
        Self {
            id: generate_audit_id(),
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            details: String::new(),
            task_id: String::new(),
            user_action: false,
            error: String::new(),
        }
    }

    /// An operator-initiated action.
    pub fn user_action(message: impl Into<String>, details: impl Into<String>) -> Self {
        let mut entry = Self::new(AuditLevel::Info, AuditCategory::UserAction, message);
        entry.details = details.into();
        entry.user_action = true;
        entry
    }

    /// An execution event for one task.
    pub fn task_event(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut entry = Self::new(AuditLevel::Info, AuditCategory::TaskExecution, message);
        entry.task_id = task_id.into();
        entry
    }

    /// An error entry with the source error rendered into `error`.
    pub fn error_event(
        category: AuditCategory,
        message: impl Into<String>,
        error: &dyn std::fmt::Display,
    ) -> Self {
        let mut entry = Self::new(AuditLevel::Error, category, message);
        entry.error = error.to_string();
        entry
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }
}

/// Fire-and-forget handle over the audit store.
#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
}

impl AuditSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append an entry in the background. Never blocks or fails the caller.
    pub fn emit(&self, entry: AuditEntry) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.append(&entry).await {
                tracing::warn!(error = %e, message = %entry.message, "Failed to append audit entry");
            }
        });
    }

    /// Append an entry and wait for the write. Used at batch boundaries
    /// where the trail must be complete before the caller returns.
    pub async fn emit_sync(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append(&entry).await {
            tracing::warn!(error = %e, message = %entry.message, "Failed to append audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_action_entry_is_flagged() {
        let entry = AuditEntry::user_action("Task created", "id: t1");
        assert!(entry.user_action);
        assert_eq!(entry.category, AuditCategory::UserAction);
        assert_eq!(entry.level, AuditLevel::Info);
        assert_eq!(entry.details, "id: t1");
    }

    #[test]
    fn task_event_carries_task_id() {
        let entry = AuditEntry::task_event("t42", "Scenario started");
        assert_eq!(entry.task_id, "t42");
        assert_eq!(entry.category, AuditCategory::TaskExecution);
    }

    #[test]
    fn error_event_renders_source() {
        let source = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let entry = AuditEntry::error_event(AuditCategory::Storage, "Write failed", &source);
        assert_eq!(entry.level, AuditLevel::Error);
        assert!(entry.error.contains("disk full"));
    }

    #[test]
    fn entry_serde_roundtrip() {
        let entry = AuditEntry::task_event("t1", "Completed").with_details("slot booked");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"task_execution\""));
        let parsed: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.task_id, "t1");
        assert_eq!(parsed.details, "slot booked");
    }
}
