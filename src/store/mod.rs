//! Persistence layer: trait seams plus the JSON file-backed implementation.

pub mod json;
pub mod traits;

pub use json::JsonStore;
pub use traits::{AuditStore, ReferenceStore, SettingsStore, TaskStore};
