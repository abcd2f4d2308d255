use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::error::UsageError;
use crate::models::dataset::DatasetId;
use crate::models::job::JobOutcome;
use crate::models::session::SessionContext;
use crate::models::upload::{
    FileKind, LocalFile, Registration, UploadError, UploadEvent, UploadOutcome, UploadState,
    UploadTask,
};
use crate::services::backend::{AnalyticsBackend, RegisterDataset};
use crate::services::poller::{JobPoller, PollSettings};
use crate::services::storage::ObjectStorage;

/// Default ingestion ceiling: 50 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Client-side allow-list checked before any network call.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub allowed: Vec<FileKind>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed: FileKind::ALL.to_vec(),
        }
    }
}

impl UploadPolicy {
    pub fn check(&self, file: &LocalFile) -> Result<FileKind, UploadError> {
        let by_extension = file.extension().and_then(FileKind::from_extension);
        let by_media_type = file.media_type().and_then(FileKind::from_media_type);
        let kind = [by_extension, by_media_type]
            .into_iter()
            .flatten()
            .find(|k| self.allowed.contains(k))
            .ok_or_else(|| UploadError::UnsupportedType {
                file_name: file.name().to_string(),
                allowed: self
                    .allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        if file.size() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: file.size(),
                limit: self.max_bytes,
            });
        }
        Ok(kind)
    }
}

/// Drives an [`UploadTask`] from selection to a dataset id:
/// validate, request credential, transfer to storage, register.
pub struct IngestionPipeline {
    backend: Arc<dyn AnalyticsBackend>,
    storage: Arc<dyn ObjectStorage>,
    poller: JobPoller<dyn AnalyticsBackend>,
    policy: UploadPolicy,
}

impl IngestionPipeline {
    pub fn new(
        backend: Arc<dyn AnalyticsBackend>,
        storage: Arc<dyn ObjectStorage>,
        policy: UploadPolicy,
        poll: PollSettings,
    ) -> Self {
        Self {
            poller: JobPoller::new(Arc::clone(&backend), poll),
            backend,
            storage,
            policy,
        }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Run the task once from `Validating`.
    ///
    /// Every transition is sent on `events` when given. Failures end up in the
    /// returned outcome and in the task state; `Err` is reserved for misuse,
    /// such as re-running a task that already succeeded.
    ///
    /// A failed task may be run again; each run requests a fresh credential.
    pub async fn run(
        &self,
        session: &SessionContext,
        task: &mut UploadTask,
        events: Option<&UnboundedSender<UploadEvent>>,
    ) -> Result<UploadOutcome, UsageError> {
        if matches!(task.state(), UploadState::Succeeded(_)) {
            return Err(UsageError::UploadAlreadySucceeded(task.id()));
        }

        let started = Instant::now();
        task.begin_attempt();
        emit(task, events);

        let span = info_span!(
            "upload",
            task_id = %task.id(),
            file = %task.file().name(),
            attempt = task.attempts()
        );
        let result = self.drive(session, task, events).instrument(span).await;

        let outcome = match result {
            Ok(dataset_id) => {
                info!(task_id = %task.id(), dataset_id = %dataset_id, "Upload succeeded");
                metrics::counter!("ingestion_uploads_total", "outcome" => "succeeded").increment(1);
                transition(task, UploadState::Succeeded(dataset_id.clone()), events);
                UploadOutcome::Succeeded(dataset_id)
            }
            Err(error) => {
                warn!(task_id = %task.id(), error = %error, "Upload failed");
                metrics::counter!("ingestion_uploads_total", "outcome" => "failed").increment(1);
                transition(task, UploadState::Failed(error.clone()), events);
                UploadOutcome::Failed(error)
            }
        };
        metrics::histogram!("ingestion_upload_seconds").record(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    async fn drive(
        &self,
        session: &SessionContext,
        task: &mut UploadTask,
        events: Option<&UnboundedSender<UploadEvent>>,
    ) -> Result<DatasetId, UploadError> {
        let kind = self.policy.check(task.file())?;
        info!(kind = %kind, size = task.file().size(), "File accepted");

        transition(task, UploadState::RequestingCredential, events);
        let credential = self
            .backend
            .request_upload_credential(session, task.file().name())
            .await
            .map_err(|e| UploadError::Credential(e.to_string()))?;

        transition(
            task,
            UploadState::Transferring {
                progress_percent: None,
            },
            events,
        );
        let file = task.file().clone();
        let total = file.size();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let transfer = self.storage.put_object(&credential, &file, progress_tx);
        tokio::pin!(transfer);

        let transferred = loop {
            tokio::select! {
                Some(sent) = progress_rx.recv() => {
                    if task.record_progress(percent_of(sent, total)) {
                        emit(task, events);
                    }
                }
                result = &mut transfer => break result,
            }
        };
        // Progress events may still be queued behind the completion.
        while let Ok(sent) = progress_rx.try_recv() {
            if task.record_progress(percent_of(sent, total)) {
                emit(task, events);
            }
        }
        transferred.map_err(|e| UploadError::StorageRejected(e.to_string()))?;
        if task.progress_percent().is_some() && task.record_progress(100) {
            emit(task, events);
        }

        transition(task, UploadState::Registering, events);
        let request = RegisterDataset {
            storage_path: credential.storage_path.clone(),
            file_name: file.name().to_string(),
            size_bytes: total,
        };
        let registration = self
            .backend
            .register_dataset(session, &request)
            .await
            .map_err(|e| UploadError::Registration(e.to_string()))?;

        match registration {
            Registration::Ready(dataset_id) => Ok(dataset_id),
            Registration::Pending(job_id) => {
                info!(job_id = %job_id, "Registration continues as a backend job");
                match self
                    .poller
                    .wait(session, &job_id, &CancellationToken::new())
                    .await
                {
                    JobOutcome::Completed(payload) => dataset_id_from_payload(&payload),
                    JobOutcome::Failed(e) => Err(UploadError::Registration(e.to_string())),
                }
            }
        }
    }
}

fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

fn dataset_id_from_payload(payload: &serde_json::Value) -> Result<DatasetId, UploadError> {
    payload
        .get("dataset_id")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            UploadError::Registration("job completed without a dataset_id".to_string())
        })
        .and_then(|raw| {
            DatasetId::new(raw).map_err(|e| UploadError::Registration(e.to_string()))
        })
}

fn transition(
    task: &mut UploadTask,
    state: UploadState,
    events: Option<&UnboundedSender<UploadEvent>>,
) {
    info!(
        task_id = %task.id(),
        from = task.state().name(),
        to = state.name(),
        "Upload state change"
    );
    task.set_state(state);
    emit(task, events);
}

fn emit(task: &UploadTask, events: Option<&UnboundedSender<UploadEvent>>) {
    if let Some(events) = events {
        // Listener may have gone away; the task state is still authoritative.
        let _ = events.send(UploadEvent {
            task_id: task.id(),
            state: task.state().clone(),
            at: Utc::now(),
        });
    }
}
