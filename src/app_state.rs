use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::session::SessionContext;
use crate::services::{
    backend::{AnalyticsBackend, BackendError, HttpBackend},
    ingestion::{IngestionPipeline, UploadPolicy},
    orchestrator::QueryOrchestrator,
    poller::{JobPoller, PollSettings},
    storage::{ObjectStorage, PresignedUploader, StorageError},
};

/// Shared handles the pipeline, orchestrator and poller are built from.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn AnalyticsBackend>,
    pub storage: Arc<dyn ObjectStorage>,
    pub session: SessionContext,
    pub poll: PollSettings,
    pub policy: UploadPolicy,
    pub narrative_row_cap: usize,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn AnalyticsBackend>,
        storage: Arc<dyn ObjectStorage>,
        session: SessionContext,
        poll: PollSettings,
        policy: UploadPolicy,
        narrative_row_cap: usize,
    ) -> Self {
        Self {
            backend,
            storage,
            session,
            poll,
            policy,
            narrative_row_cap,
        }
    }

    /// Build the HTTP collaborators described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let backend = HttpBackend::new(&config.api_base_url, config.request_timeout())?;
        let storage = PresignedUploader::new(config.request_timeout())?;

        Ok(Self::new(
            Arc::new(backend),
            Arc::new(storage),
            config.session()?,
            config.poll_settings()?,
            config.upload_policy(),
            config.narrative_row_cap,
        ))
    }

    pub fn ingestion(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.storage),
            self.policy.clone(),
            self.poll,
        )
    }

    pub fn orchestrator(&self) -> QueryOrchestrator {
        QueryOrchestrator::new(Arc::clone(&self.backend), self.narrative_row_cap)
    }

    pub fn job_poller(&self) -> JobPoller<dyn AnalyticsBackend> {
        JobPoller::new(Arc::clone(&self.backend), self.poll)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Usage(#[from] crate::error::UsageError),

    #[error("Failed to build backend client: {0}")]
    Backend(#[from] BackendError),

    #[error("Failed to build storage client: {0}")]
    Storage(#[from] StorageError),
}
