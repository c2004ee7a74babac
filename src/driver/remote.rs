//! HTTP client for the automation sidecar.
//!
//! The sidecar owns the actual browser; this crate drives it over a small
//! JSON API: open a session, authenticate, run the scenario, tear down.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use crate::driver::{AutomationDriver, Credentials, DriverOptions, DriverSession, ScenarioOutcome};
use crate::error::DriverError;
use crate::tasks::model::Task;

/// Driver that opens sessions on a remote automation sidecar.
pub struct RemoteDriver {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SessionOpened {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ScenarioResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    booked_slot: Option<String>,
}

impl RemoteDriver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AutomationDriver for RemoteDriver {
    async fn open(&self, options: &DriverOptions) -> Result<Box<dyn DriverSession>, DriverError> {
        let url = format!("{}/session", self.base_url);
        let response = self.client.post(&url).json(options).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::SessionOpen {
                reason: format!("sidecar returned {status}: {body}"),
            });
        }

        let opened: SessionOpened = response.json().await?;
        tracing::debug!(session_id = %opened.session_id, "Browser session opened");
        Ok(Box::new(RemoteSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: opened.session_id,
            closed: false,
        }))
    }
}

struct RemoteSession {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    closed: bool,
}

impl RemoteSession {
    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/session/{}/{suffix}", self.base_url, self.session_id)
    }
}

#[async_trait]
impl DriverSession for RemoteSession {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), DriverError> {
        let body = json!({
            "login": credentials.login,
            "password": credentials.password.expose_secret(),
        });
        let response = self
            .client
            .post(self.endpoint("authenticate"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::Auth {
                reason: format!("sidecar returned {status}: {body}"),
            });
        }
        Ok(())
    }

    async fn run_scenario(&mut self, task: &Task) -> Result<ScenarioOutcome, DriverError> {
        let response = self
            .client
            .post(self.endpoint("scenario"))
            .json(task)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::Scenario {
                task_id: task.id.clone(),
                reason: format!("sidecar returned {status}: {body}"),
            });
        }

        let parsed: ScenarioResponse = response.json().await?;
        Ok(ScenarioOutcome {
            message: parsed.message,
            booked_slot: parsed.booked_slot,
        })
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        let response = self
            .client
            .delete(format!("{}/session/{}", self.base_url, self.session_id))
            .send()
            .await?;

        // The session is gone either way; remember that before checking.
        self.closed = true;
        if !response.status().is_success() {
            let status = response.status();
            return Err(DriverError::Teardown {
                reason: format!("sidecar returned {status}"),
            });
        }
        tracing::debug!(session_id = %self.session_id, "Browser session closed");
        Ok(())
    }
}
