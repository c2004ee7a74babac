//! Browser automation seam.
//!
//! The orchestrator only sees the two traits here. The real portal
//! automation runs in a sidecar process behind [`remote::RemoteDriver`];
//! tests substitute in-process fakes.

pub mod remote;

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;

use crate::error::DriverError;
use crate::settings::{ConnectionTestResult, Settings};
use crate::tasks::model::Task;

pub use remote::RemoteDriver;

/// Portal credentials handed to a session at authentication time.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            login: settings.login.clone(),
            password: settings.password.clone(),
        }
    }
}

/// Browser options for one session, derived from the stored settings.
#[derive(Debug, Clone, Serialize)]
pub struct DriverOptions {
    pub portal_url: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Per-element wait, seconds.
    pub element_timeout: u32,
    /// Explicit browser binary, empty for the driver default.
    pub browser_path: String,
    pub slot_check_attempts: u32,
    pub slot_check_interval: u32,
}

impl DriverOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            portal_url: settings.portal_url.clone(),
            headless: settings.headless,
            viewport_width: settings.viewport_width,
            viewport_height: settings.viewport_height,
            element_timeout: settings.element_timeout,
            browser_path: settings.browser_path.clone(),
            slot_check_attempts: settings.slot_check_attempts,
            slot_check_interval: settings.slot_check_interval,
        }
    }
}

/// What a completed scenario reports back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioOutcome {
    /// Human-readable confirmation from the portal.
    pub message: String,
    /// The slot that was actually booked, when the portal reports one.
    pub booked_slot: Option<String>,
}

/// Session factory. One driver serves many sessions; sessions are never
/// shared between tasks.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Open a fresh browser session.
    async fn open(&self, options: &DriverOptions) -> Result<Box<dyn DriverSession>, DriverError>;
}

/// One live browser session. Callers must `close` on every exit path;
/// implementations make `close` idempotent.
#[async_trait]
pub trait DriverSession: Send {
    /// Log in to the portal.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError>;

    /// Run the booking scenario for one task.
    async fn run_scenario(&mut self, task: &Task) -> Result<ScenarioOutcome, DriverError>;

    /// Tear the session down. Safe to call more than once.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Open a session, authenticate and tear it down again, reporting how the
/// round trip went. The session is closed on every path, including failures.
pub async fn test_connection(
    driver: &dyn AutomationDriver,
    settings: &Settings,
) -> ConnectionTestResult {
    let started = Instant::now();
    let outcome = run_connection_probe(driver, settings).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => ConnectionTestResult {
            success: true,
            message: format!("Connected to {}", settings.portal_url),
            error: None,
            duration_ms,
            tested_at: Utc::now(),
        },
        Err(e) => ConnectionTestResult {
            success: false,
            message: "Connection test failed".to_string(),
            error: Some(e.to_string()),
            duration_ms,
            tested_at: Utc::now(),
        },
    }
}

/// Run a connection test and persist the outcome on the stored settings.
pub async fn test_and_record_connection(
    driver: &dyn AutomationDriver,
    store: &dyn crate::store::SettingsStore,
) -> crate::error::Result<ConnectionTestResult> {
    let mut settings = store.get().await?;
    let result = test_connection(driver, &settings).await;
    settings.record_connection_test(result.success);
    store.save(&settings).await?;
    Ok(result)
}

async fn run_connection_probe(
    driver: &dyn AutomationDriver,
    settings: &Settings,
) -> Result<(), DriverError> {
    if !settings.can_connect() {
        return Err(DriverError::Auth {
            reason: "portal URL, login and password must all be configured".to_string(),
        });
    }

    let options = DriverOptions::from_settings(settings);
    let mut session = driver.open(&options).await?;
    let result = session.authenticate(&Credentials::from_settings(settings)).await;
    let closed = session.close().await;
    result?;
    closed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ProbeSession {
        closes: Arc<AtomicUsize>,
        fail_auth: bool,
    }

    #[async_trait]
    impl DriverSession for ProbeSession {
        async fn authenticate(&mut self, _credentials: &Credentials) -> Result<(), DriverError> {
            if self.fail_auth {
                Err(DriverError::Auth {
                    reason: "bad credentials".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn run_scenario(&mut self, _task: &Task) -> Result<ScenarioOutcome, DriverError> {
            Ok(ScenarioOutcome::default())
        }

        async fn close(&mut self) -> Result<(), DriverError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ProbeDriver {
        closes: Arc<AtomicUsize>,
        fail_auth: bool,
    }

    #[async_trait]
    impl AutomationDriver for ProbeDriver {
        async fn open(
            &self,
            _options: &DriverOptions,
        ) -> Result<Box<dyn DriverSession>, DriverError> {
            Ok(Box::new(ProbeSession {
                closes: self.closes.clone(),
                fail_auth: self.fail_auth,
            }))
        }
    }

    fn configured_settings() -> Settings {
        Settings {
            login: "operator".into(),
            password: SecretString::from("hunter2"),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn connection_test_reports_success() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = ProbeDriver {
            closes: closes.clone(),
            fail_auth: false,
        };
        let result = test_connection(&driver, &configured_settings()).await;
        assert!(result.success);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_test_closes_session_on_auth_failure() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = ProbeDriver {
            closes: closes.clone(),
            fail_auth: true,
        };
        let result = test_connection(&driver, &configured_settings()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("bad credentials"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_test_outcome_is_recorded() {
        use crate::store::{JsonStore, SettingsStore};

        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        let mut settings = SettingsStore::get(&store).await.unwrap();
        settings.login = "operator".into();
        settings.password = SecretString::from("hunter2");
        SettingsStore::save(&store, &settings).await.unwrap();

        let driver = ProbeDriver {
            closes: Arc::new(AtomicUsize::new(0)),
            fail_auth: false,
        };
        let result = test_and_record_connection(&driver, &store).await.unwrap();
        assert!(result.success);

        let reloaded = SettingsStore::get(&store).await.unwrap();
        assert!(reloaded.connection_ok);
        assert!(reloaded.last_connection_test.is_some());
    }

    #[tokio::test]
    async fn connection_test_requires_credentials() {
        let closes = Arc::new(AtomicUsize::new(0));
        let driver = ProbeDriver {
            closes,
            fail_auth: false,
        };
        let result = test_connection(&driver, &Settings::default()).await;
        assert!(!result.success);
    }
}
