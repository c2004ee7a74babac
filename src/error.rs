//! Error types for slot-runner.

/// Top-level error type for the automation core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Execution cancelled by operator")]
    Cancelled,

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Shorthand for a task lookup failure.
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "task",
            id: id.into(),
        }
    }
}

/// Caller-correctable validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Required field is missing: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("Value '{value}' is not in the {catalog} catalog. Available: {available}")]
    UnknownReference {
        catalog: String,
        value: String,
        available: String,
    },

    #[error("The {catalog} catalog is empty; add values before creating tasks")]
    EmptyCatalog { catalog: String },

    #[error("Unknown reference catalog: {key}")]
    UnknownCatalog { key: String },
}

/// Failures of the file-backed store.
///
/// A missing backing file is not an error (it reads as an empty
/// collection); these cover genuine I/O and corruption.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error on {collection}: {source}")]
    Io {
        collection: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt {collection} collection: {source}")]
    Corrupt {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// External automation driver failures. Always retryable by a higher layer.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to open driver session: {reason}")]
    SessionOpen { reason: String },

    #[error("Portal authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Scenario failed for task {task_id}: {reason}")]
    Scenario { task_id: String, reason: String },

    #[error("Driver teardown failed: {reason}")]
    Teardown { reason: String },

    #[error("Driver transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One task's failure inside a batch.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task_id: String,
    pub reason: String,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.task_id, self.reason)
    }
}

/// Aggregate outcome of a batch run with at least one failure.
///
/// Already-completed tasks keep their terminal status; this error only
/// summarises what went wrong, it does not imply rollback.
#[derive(Debug, thiserror::Error)]
#[error("{} succeeded, {} failed: [{}]", .succeeded, .failures.len(), render_failures(.failures))]
pub struct BatchError {
    pub succeeded: usize,
    pub failures: Vec<TaskFailure>,
}

fn render_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the automation core.
pub type Result<T> = std::result::Result<T, Error>;
