use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::dataset::DatasetId;
use crate::models::job::{JobId, JobSnapshot};
use crate::models::query::{Question, QueryResult, Row};
use crate::models::session::SessionContext;
use crate::models::upload::{Registration, UploadCredential};

/// Source of job status checks, consumed by the job poller.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job_status(
        &self,
        session: &SessionContext,
        job_id: &JobId,
    ) -> Result<JobSnapshot, BackendError>;
}

/// The analytical backend as seen by the client core.
#[async_trait]
pub trait AnalyticsBackend: JobStatusSource {
    async fn request_upload_credential(
        &self,
        session: &SessionContext,
        file_name: &str,
    ) -> Result<UploadCredential, BackendError>;

    async fn register_dataset(
        &self,
        session: &SessionContext,
        request: &RegisterDataset,
    ) -> Result<Registration, BackendError>;

    async fn execute_query(
        &self,
        session: &SessionContext,
        dataset_id: &DatasetId,
        question: &Question,
    ) -> Result<QueryResult, BackendError>;

    async fn generate_narrative(
        &self,
        session: &SessionContext,
        request: &NarrativeRequest,
    ) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterDataset {
    pub storage_path: String,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeRequest {
    pub dataset_id: DatasetId,
    pub question: Question,
    pub rows: Vec<Row>,
}

#[derive(Serialize)]
struct CredentialRequest<'a> {
    file_name: &'a str,
    tenant_id: &'a str,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    #[serde(default)]
    dataset_id: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Serialize)]
struct DashboardRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct NarrativeResponse {
    narrative: String,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum RemoteJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: RemoteJobStatus,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl From<JobStatusResponse> for JobSnapshot {
    fn from(resp: JobStatusResponse) -> Self {
        match resp.status {
            RemoteJobStatus::Pending | RemoteJobStatus::Processing => JobSnapshot::processing(),
            RemoteJobStatus::Completed => {
                JobSnapshot::completed(resp.result.unwrap_or(serde_json::Value::Null))
            }
            RemoteJobStatus::Failed => JobSnapshot::failed(
                resp.error
                    .unwrap_or_else(|| "job failed without a reason".to_string()),
            ),
        }
    }
}

/// FastAPI-style error body.
#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// HTTP client for the analytical backend.
pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("insight-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Config(format!("{base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Config(format!("{base_url} cannot carry a path")));
        }
        base_url.set_query(None);
        base_url.set_fragment(None);

        Ok(Self { http, base_url })
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        // Always a base: checked in new().
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        session: &SessionContext,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = request.bearer_auth(session.bearer_token()).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }
}

/// Prefer the `detail` field of a JSON error body, else the raw text.
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl JobStatusSource for HttpBackend {
    async fn job_status(
        &self,
        session: &SessionContext,
        job_id: &JobId,
    ) -> Result<JobSnapshot, BackendError> {
        let url = self.url(["api", "v1", "datasets", "job", job_id.as_str()]);
        let resp: JobStatusResponse = self.send_json(session, self.http.get(url)).await?;
        Ok(resp.into())
    }
}

#[async_trait]
impl AnalyticsBackend for HttpBackend {
    async fn request_upload_credential(
        &self,
        session: &SessionContext,
        file_name: &str,
    ) -> Result<UploadCredential, BackendError> {
        let url = self.url(["api", "v1", "datasets", "upload-url"]);
        let body = CredentialRequest {
            file_name,
            tenant_id: session.tenant_id(),
        };
        let credential: UploadCredential = self
            .send_json(session, self.http.post(url).json(&body))
            .await?;

        if credential.url.is_empty() || credential.storage_path.is_empty() {
            return Err(BackendError::InvalidResponse(
                "credential is missing url or storage_path".to_string(),
            ));
        }
        Ok(credential)
    }

    async fn register_dataset(
        &self,
        session: &SessionContext,
        request: &RegisterDataset,
    ) -> Result<Registration, BackendError> {
        let url = self.url(["api", "v1", "datasets", "register"]);
        let resp: RegistrationResponse = self
            .send_json(session, self.http.post(url).json(request))
            .await?;

        // A job handle means the backend is still processing the object.
        if let Some(job_id) = resp.job_id {
            let job_id = JobId::parse(&job_id)
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
            return Ok(Registration::Pending(job_id));
        }
        match resp.dataset_id {
            Some(id) => DatasetId::new(id)
                .map(Registration::Ready)
                .map_err(|e| BackendError::InvalidResponse(e.to_string())),
            None => Err(BackendError::InvalidResponse(
                "registration returned neither dataset_id nor job_id".to_string(),
            )),
        }
    }

    async fn execute_query(
        &self,
        session: &SessionContext,
        dataset_id: &DatasetId,
        question: &Question,
    ) -> Result<QueryResult, BackendError> {
        let url = self.url(["api", "v1", "datasets", dataset_id.as_str(), "dashboard"]);
        let body = DashboardRequest {
            prompt: question.as_str(),
        };
        self.send_json(session, self.http.post(url).json(&body))
            .await
    }

    async fn generate_narrative(
        &self,
        session: &SessionContext,
        request: &NarrativeRequest,
    ) -> Result<String, BackendError> {
        let url = self.url(["api", "v1", "narrative", "generate"]);
        let resp: NarrativeResponse = self
            .send_json(session, self.http.post(url).json(request))
            .await?;
        Ok(resp.narrative)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Unexpected backend response: {0}")]
    InvalidResponse(String),

    #[error("Invalid backend base URL: {0}")]
    Config(String),
}
