//! Task domain: queue model and the management facade.

pub mod model;
pub mod service;

pub use model::{Task, TaskKind, TaskStatus};
pub use service::TaskService;
