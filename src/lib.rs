//! Slot Runner — terminal slot booking orchestrator.
//!
//! Manages a persistent queue of import/export booking tasks and drives
//! them through a browser-automation sidecar, one session per task.

pub mod audit;
pub mod config;
pub mod driver;
pub mod error;
pub mod exec;
pub mod references;
pub mod settings;
pub mod store;
pub mod tasks;
