//! Batch execution: contexts, summaries and the orchestrator.

pub mod context;
pub mod orchestrator;

pub use context::{BatchMode, BatchSummary, ExecContext};
pub use orchestrator::Orchestrator;
