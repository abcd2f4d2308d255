//! Scriptable in-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::dataset::DatasetId;
use crate::models::job::{JobId, JobSnapshot};
use crate::models::query::{ChartKind, ChartSpec, Question, QueryResult, Row};
use crate::models::session::SessionContext;
use crate::models::upload::{LocalFile, Registration, TransferMethod, UploadCredential};
use crate::services::backend::{
    AnalyticsBackend, BackendError, JobStatusSource, NarrativeRequest, RegisterDataset,
};
use crate::services::storage::{ObjectStorage, StorageError};

pub(crate) fn session() -> SessionContext {
    SessionContext::new("test-token", "tenant_a").unwrap()
}

pub(crate) fn unavailable(detail: &str) -> BackendError {
    BackendError::Status {
        status: 503,
        detail: detail.to_string(),
    }
}

pub(crate) fn revenue_rows() -> Vec<Row> {
    let rows = serde_json::json!([
        {"region": "West", "total": 120000},
        {"region": "East", "total": 95000},
        {"region": "North", "total": 70000}
    ]);
    serde_json::from_value(rows).unwrap()
}

pub(crate) fn revenue_result() -> QueryResult {
    QueryResult {
        rows: revenue_rows(),
        chart: ChartSpec {
            kind: ChartKind::BarChart,
            x_axis: Some("region".to_string()),
            y_axis: Some("total".to_string()),
            title: None,
        },
        sql_query: None,
        thought_process: None,
    }
}

type Scripted<T> = (Duration, Result<T, String>);

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub credential_failures: AtomicU32,
    pub credential_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub narrative_calls: AtomicUsize,
    pub registration: Mutex<Option<Result<Registration, String>>>,
    pub jobs: Mutex<HashMap<String, VecDeque<Scripted<JobSnapshot>>>>,
    pub job_calls: Mutex<HashMap<String, usize>>,
    pub queries: Mutex<HashMap<String, Scripted<QueryResult>>>,
    pub narratives: Mutex<HashMap<String, Scripted<String>>>,
    pub narrative_requests: Mutex<Vec<NarrativeRequest>>,
    pub registrations: Mutex<Vec<RegisterDataset>>,
}

impl FakeBackend {
    pub fn script_job(&self, job_id: &str, steps: Vec<Scripted<JobSnapshot>>) {
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id.to_string(), steps.into_iter().collect());
    }

    pub fn job_calls(&self, job_id: &str) -> usize {
        self.job_calls.lock().unwrap().get(job_id).copied().unwrap_or(0)
    }

    pub fn script_query(
        &self,
        question: &str,
        delay: Duration,
        result: Result<QueryResult, String>,
    ) {
        self.queries
            .lock()
            .unwrap()
            .insert(question.to_string(), (delay, result));
    }

    pub fn script_narrative(
        &self,
        question: &str,
        delay: Duration,
        result: Result<String, String>,
    ) {
        self.narratives
            .lock()
            .unwrap()
            .insert(question.to_string(), (delay, result));
    }
}

#[async_trait]
impl JobStatusSource for FakeBackend {
    async fn job_status(
        &self,
        _session: &SessionContext,
        job_id: &JobId,
    ) -> Result<JobSnapshot, BackendError> {
        *self
            .job_calls
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default() += 1;

        let step = self
            .jobs
            .lock()
            .unwrap()
            .get_mut(job_id.as_str())
            .and_then(VecDeque::pop_front);
        let (delay, result) = step.unwrap_or((Duration::ZERO, Ok(JobSnapshot::processing())));
        tokio::time::sleep(delay).await;
        result.map_err(|e| unavailable(&e))
    }
}

#[async_trait]
impl AnalyticsBackend for FakeBackend {
    async fn request_upload_credential(
        &self,
        session: &SessionContext,
        file_name: &str,
    ) -> Result<UploadCredential, BackendError> {
        let attempt = self.credential_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .credential_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(unavailable("credential service unreachable"));
        }

        let storage_path = format!("{}/{}", session.tenant_id(), file_name);
        let mut fields = BTreeMap::new();
        fields.insert("key".to_string(), storage_path.clone());
        fields.insert("x-attempt".to_string(), attempt.to_string());
        Ok(UploadCredential {
            url: "https://storage.test/bucket".to_string(),
            method: TransferMethod::Post,
            fields,
            headers: BTreeMap::new(),
            storage_path,
        })
    }

    async fn register_dataset(
        &self,
        _session: &SessionContext,
        request: &RegisterDataset,
    ) -> Result<Registration, BackendError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.registrations.lock().unwrap().push(request.clone());
        let scripted = self.registration.lock().unwrap().clone();
        match scripted {
            Some(Ok(registration)) => Ok(registration),
            Some(Err(e)) => Err(unavailable(&e)),
            None => Ok(Registration::Ready(DatasetId::new("ds_123").unwrap())),
        }
    }

    async fn execute_query(
        &self,
        _session: &SessionContext,
        _dataset_id: &DatasetId,
        question: &Question,
    ) -> Result<QueryResult, BackendError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.queries.lock().unwrap().get(question.as_str()).cloned();
        let (delay, result) = scripted.unwrap_or((Duration::ZERO, Ok(revenue_result())));
        tokio::time::sleep(delay).await;
        result.map_err(|e| unavailable(&e))
    }

    async fn generate_narrative(
        &self,
        _session: &SessionContext,
        request: &NarrativeRequest,
    ) -> Result<String, BackendError> {
        self.narrative_calls.fetch_add(1, Ordering::SeqCst);
        self.narrative_requests.lock().unwrap().push(request.clone());
        let scripted = self
            .narratives
            .lock()
            .unwrap()
            .get(request.question.as_str())
            .cloned();
        let (delay, result) = scripted.unwrap_or_else(|| {
            (Duration::ZERO, Ok(format!("Narrative for {}", request.question)))
        });
        tokio::time::sleep(delay).await;
        result.map_err(|e| unavailable(&e))
    }
}

#[derive(Default)]
pub(crate) struct FakeStorage {
    pub calls: AtomicUsize,
    pub reject_next: AtomicBool,
    pub silent: AtomicBool,
    pub attempts_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        credential: &UploadCredential,
        file: &LocalFile,
        progress: UnboundedSender<u64>,
    ) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(attempt) = credential.fields.get("x-attempt") {
            self.attempts_seen.lock().unwrap().push(attempt.clone());
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Rejected {
                status: 403,
                detail: "policy expired".to_string(),
            });
        }
        if !self.silent.load(Ordering::SeqCst) {
            let size = file.size();
            for quarter in 1..=4u64 {
                let _ = progress.send(size * quarter / 4);
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }
}
