use serde::{Deserialize, Serialize};
use strum::Display;

/// Observable status of a polled backend job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Server-assigned job handle.
///
/// Job ids end up in a URL path, so they are restricted to a conservative
/// character set and rejected up front when malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub const MAX_LEN: usize = super::MAX_IDENTIFIER_LEN;

    pub fn parse(raw: &str) -> Result<Self, crate::error::UsageError> {
        match super::identifier_problem(raw) {
            Some(reason) => Err(crate::error::UsageError::InvalidJobId {
                id: raw.to_string(),
                reason,
            }),
            None => Ok(Self(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the poller exposes to its caller: `{status, data, error}`.
///
/// `data` is only set when `Completed`, `error` only when `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            data: None,
            error: None,
        }
    }

    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            data: None,
            error: None,
        }
    }

    pub fn completed(data: serde_json::Value) -> Self {
        Self {
            status: JobStatus::Completed,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// A job handle together with its last observed status.
#[derive(Debug, Clone, PartialEq)]
pub struct PollableJob {
    pub job_id: JobId,
    pub status: JobSnapshot,
}

/// Terminal result of waiting on a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(serde_json::Value),
    Failed(JobPollError),
}

/// Why a job did not reach `Completed`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobPollError {
    #[error("Job reported failure: {0}")]
    JobFailed(String),

    #[error("Status check failed: {0}")]
    StatusCheck(String),

    #[error("Job still processing after {0} status checks")]
    AttemptsExhausted(u32),

    #[error("Polling was cancelled")]
    Cancelled,
}
