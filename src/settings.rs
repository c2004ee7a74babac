//! System settings — portal credentials, retry/timeout defaults, browser
//! options. Read by task creation (default budgets) and by the driver
//! (session options).

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

fn default_portal_url() -> String {
    "https://www.rlisystems.ru/conterra/".to_string()
}

fn default_refresh_interval() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    60
}

fn default_retry_delay_seconds() -> u32 {
    60
}

fn default_element_timeout() -> u32 {
    10
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_slot_check_attempts() -> u32 {
    10
}

fn default_slot_check_interval() -> u32 {
    5
}

fn default_secret() -> SecretString {
    SecretString::from("")
}

/// Persisted system settings (singleton collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Terminal portal entry URL.
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    /// Portal login.
    #[serde(default)]
    pub login: String,
    /// Portal password. Serialized (the store file is the credential
    /// store), but never printed through Debug/Display.
    #[serde(default = "default_secret", with = "secret_string")]
    pub password: SecretString,
    /// UI refresh interval, seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u32,
    /// Outcome of the last connection test.
    #[serde(default)]
    pub connection_ok: bool,
    #[serde(default)]
    pub last_connection_test: Option<DateTime<Utc>>,
    /// Attempt budget given to tasks created without one.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Retry delay given to tasks created without one, seconds.
    #[serde(default = "default_retry_delay_seconds")]
    pub default_retry_delay_seconds: u32,
    /// Per-element wait inside the automation driver, seconds.
    #[serde(default = "default_element_timeout")]
    pub element_timeout: u32,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub save_credentials: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Explicit browser binary path, empty for driver default.
    #[serde(default)]
    pub browser_path: String,
    /// How many times the driver polls for a free slot.
    #[serde(default = "default_slot_check_attempts")]
    pub slot_check_attempts: u32,
    /// Pause between slot polls, seconds.
    #[serde(default = "default_slot_check_interval")]
    pub slot_check_interval: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serde adapter: SecretString stores as a plain JSON string.
mod secret_string {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
        Ok(SecretString::from(String::deserialize(de)?))
    }
}

impl Default for Settings {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            portal_url: default_portal_url(),
            login: String::new(),
            password: default_secret(),
            refresh_interval: default_refresh_interval(),
            connection_ok: false,
            last_connection_test: None,
            default_max_attempts: default_max_attempts(),
            default_retry_delay_seconds: default_retry_delay_seconds(),
            element_timeout: default_element_timeout(),
            headless: false,
            save_credentials: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            browser_path: String::new(),
            slot_check_attempts: default_slot_check_attempts(),
            slot_check_interval: default_slot_check_interval(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Settings {
    /// Whether enough is configured to open an authenticated session.
    pub fn can_connect(&self) -> bool {
        !self.portal_url.is_empty()
            && !self.login.is_empty()
            && !self.password.expose_secret().is_empty()
    }

    /// Record the outcome of a connection test.
    pub fn record_connection_test(&mut self, ok: bool) {
        self.connection_ok = ok;
        self.last_connection_test = Some(Utc::now());
        self.updated_at = Utc::now();
    }
}

/// Result of a portal connection test.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    /// Wall time of the whole test, milliseconds.
    pub duration_ms: u64,
    pub tested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cannot_connect() {
        let settings = Settings::default();
        assert!(!settings.can_connect());
        assert_eq!(settings.default_max_attempts, 60);
        assert_eq!(settings.element_timeout, 10);
    }

    #[test]
    fn can_connect_with_credentials() {
        let settings = Settings {
            login: "operator".into(),
            password: SecretString::from("hunter2"),
            ..Settings::default()
        };
        assert!(settings.can_connect());
    }

    #[test]
    fn password_survives_serde_but_not_debug() {
        let settings = Settings {
            password: SecretString::from("hunter2"),
            ..Settings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("hunter2"));
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.password.expose_secret(), "hunter2");
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    #[test]
    fn settings_load_with_missing_fields() {
        let parsed: Settings = serde_json::from_str(
            r#"{"created_at": "2025-01-01T00:00:00Z", "updated_at": "2025-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(parsed.viewport_width, 1280);
        assert_eq!(parsed.slot_check_attempts, 10);
        assert!(parsed.password.expose_secret().is_empty());
    }

    #[test]
    fn record_connection_test_stamps_time() {
        let mut settings = Settings::default();
        settings.record_connection_test(true);
        assert!(settings.connection_ok);
        assert!(settings.last_connection_test.is_some());
    }
}
