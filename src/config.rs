//! Process configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

const DATA_DIR_VAR: &str = "SLOT_RUNNER_DATA_DIR";
const DRIVER_URL_VAR: &str = "SLOT_RUNNER_DRIVER_URL";
const MODE_VAR: &str = "SLOT_RUNNER_MODE";
const MAX_CONCURRENCY_VAR: &str = "SLOT_RUNNER_MAX_CONCURRENCY";

/// How the binary walks the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Sequential,
    Parallel,
}

/// Runtime configuration for the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the JSON collections.
    pub data_dir: PathBuf,
    /// Base URL of the automation sidecar.
    pub driver_url: String,
    pub mode: RunMode,
    /// Concurrency bound for parallel mode.
    pub max_concurrency: usize,
}

impl AppConfig {
    /// Read configuration from the environment, falling back to local
    /// development defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var(DATA_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let driver_url =
            env::var(DRIVER_URL_VAR).unwrap_or_else(|_| "http://127.0.0.1:9515".to_string());

        let mode = match env::var(MODE_VAR) {
            Ok(raw) => match raw.as_str() {
                "sequential" => RunMode::Sequential,
                "parallel" => RunMode::Parallel,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: MODE_VAR.to_string(),
                        message: format!("expected 'sequential' or 'parallel', got '{other}'"),
                    });
                }
            },
            Err(_) => RunMode::Sequential,
        };

        let max_concurrency = match env::var(MAX_CONCURRENCY_VAR) {
            Ok(raw) => raw.parse::<usize>().map_err(|e| ConfigError::InvalidValue {
                key: MAX_CONCURRENCY_VAR.to_string(),
                message: e.to_string(),
            })?,
            Err(_) => 5,
        };

        Ok(Self {
            data_dir,
            driver_url,
            mode,
            max_concurrency,
        })
    }
}
