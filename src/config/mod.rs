use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::error::UsageError;
use crate::models::session::SessionContext;
use crate::models::upload::FileKind;
use crate::services::ingestion::{UploadPolicy, DEFAULT_MAX_UPLOAD_BYTES};
use crate::services::orchestrator::DEFAULT_NARRATIVE_ROW_CAP;
use crate::services::poller::PollSettings;

#[derive(Deserialize, Validate)]
pub struct AppConfig {
    /// Analytical backend root, e.g. "https://api.example.com"
    #[serde(default = "default_api_base_url")]
    #[garde(pattern(r"^https?://[^ \t\r\n]+$"))]
    pub api_base_url: String,

    /// Opaque bearer credential forwarded on every backend call
    #[garde(length(min = 1))]
    pub auth_token: String,

    /// Tenant sent with upload credential requests
    #[garde(length(min = 1, max = 128))]
    pub tenant_id: String,

    /// Job Poller interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Status checks per job before giving up; 0 means no bound
    #[serde(default = "default_max_poll_attempts")]
    #[garde(skip)]
    pub max_poll_attempts: u32,

    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: u64,

    /// Rows forwarded to narrative generation
    #[serde(default = "default_narrative_row_cap")]
    #[garde(range(min = 1, max = 1000))]
    pub narrative_row_cap: usize,

    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1, max = 3600))]
    pub request_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:10000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_max_poll_attempts() -> u32 {
    100
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_narrative_row_cap() -> usize {
    DEFAULT_NARRATIVE_ROW_CAP
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn session(&self) -> Result<SessionContext, UsageError> {
        SessionContext::new(self.auth_token.clone(), self.tenant_id.clone())
    }

    pub fn poll_settings(&self) -> Result<PollSettings, UsageError> {
        let max_attempts = match self.max_poll_attempts {
            0 => None,
            n => Some(n),
        };
        PollSettings::new(Duration::from_millis(self.poll_interval_ms), max_attempts)
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_bytes: self.max_upload_bytes,
            allowed: FileKind::ALL.to_vec(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("narrative_row_cap", &self.narrative_row_cap)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
