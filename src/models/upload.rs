use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::models::dataset::DatasetId;
use crate::models::job::JobId;

/// Tabular formats the backend knows how to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FileKind {
    Csv,
    Parquet,
    Json,
    Spreadsheet,
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [
        FileKind::Csv,
        FileKind::Parquet,
        FileKind::Json,
        FileKind::Spreadsheet,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(FileKind::Csv),
            "parquet" | "pq" => Some(FileKind::Parquet),
            "json" | "ndjson" | "jsonl" => Some(FileKind::Json),
            "xlsx" | "xls" => Some(FileKind::Spreadsheet),
            _ => None,
        }
    }

    pub fn from_media_type(media_type: &str) -> Option<Self> {
        // Drop parameters such as "; charset=utf-8".
        let essence = media_type.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "text/csv" | "application/csv" => Some(FileKind::Csv),
            "application/vnd.apache.parquet" | "application/x-parquet" => Some(FileKind::Parquet),
            "application/json" | "application/x-ndjson" => Some(FileKind::Json),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => Some(FileKind::Spreadsheet),
            _ => None,
        }
    }

    /// Canonical media type sent to storage when the file carries none.
    pub fn media_type(self) -> &'static str {
        match self {
            FileKind::Csv => "text/csv",
            FileKind::Parquet => "application/vnd.apache.parquet",
            FileKind::Json => "application/json",
            FileKind::Spreadsheet => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

/// A client-selected file. Contents are shared, never copied per attempt.
#[derive(Clone)]
pub struct LocalFile {
    name: String,
    media_type: Option<String>,
    contents: Arc<[u8]>,
}

impl LocalFile {
    pub fn new(
        name: impl Into<String>,
        media_type: Option<String>,
        contents: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type,
            contents: contents.into(),
        }
    }

    /// Read a file from disk, inferring its media type from the extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let contents = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let media_type = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(FileKind::from_extension)
            .map(|k| k.media_type().to_string());
        Ok(Self::new(name, media_type, contents))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.contents.len() as u64
    }

    pub fn contents(&self) -> &Arc<[u8]> {
        &self.contents
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    /// Extension wins over media type; either one matching is enough.
    pub fn detect_kind(&self) -> Option<FileKind> {
        self.extension()
            .and_then(FileKind::from_extension)
            .or_else(|| self.media_type().and_then(FileKind::from_media_type))
    }
}

impl std::fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.contents.len())
            .finish()
    }
}

/// Ingestion failure taxonomy. The `Display` text is what the UI shows.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UploadError {
    #[error("Unsupported file type for {file_name:?}; allowed: {allowed}")]
    UnsupportedType { file_name: String, allowed: String },

    #[error("File is {size} bytes, which exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("Could not obtain an upload credential: {0}")]
    Credential(String),

    #[error("Storage rejected the upload: {0}")]
    StorageRejected(String),

    #[error("Dataset registration failed: {0}")]
    Registration(String),
}

impl UploadError {
    /// Client-side validation failures; no network call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::UnsupportedType { .. } | UploadError::TooLarge { .. }
        )
    }
}

/// Lifecycle of an [`UploadTask`].
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum UploadState {
    Idle,
    Validating,
    RequestingCredential,
    /// `None` when the transport does not expose progress.
    Transferring {
        progress_percent: Option<u8>,
    },
    Registering,
    Succeeded(DatasetId),
    Failed(UploadError),
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Succeeded(_) | UploadState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadState::Transferring {
                progress_percent: Some(p),
            } => write!(f, "transferring ({p}%)"),
            UploadState::Succeeded(id) => write!(f, "succeeded ({id})"),
            UploadState::Failed(e) => write!(f, "failed: {e}"),
            other => f.write_str(other.name()),
        }
    }
}

/// One in-flight file transfer, from selection to dataset id.
#[derive(Debug, Clone)]
pub struct UploadTask {
    id: Uuid,
    file: LocalFile,
    state: UploadState,
    attempts: u32,
    created_at: DateTime<Utc>,
}

impl UploadTask {
    pub fn new(file: LocalFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            state: UploadState::Idle,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn file(&self) -> &LocalFile {
        &self.file
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Number of times the pipeline has started this task.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn progress_percent(&self) -> Option<u8> {
        match self.state {
            UploadState::Transferring { progress_percent } => progress_percent,
            _ => None,
        }
    }

    pub fn dataset_id(&self) -> Option<&DatasetId> {
        match &self.state {
            UploadState::Succeeded(id) => Some(id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&UploadError> {
        match &self.state {
            UploadState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Discard the task and hand the file back to the caller.
    pub fn into_file(self) -> LocalFile {
        self.file
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.state = UploadState::Validating;
    }

    pub(crate) fn set_state(&mut self, state: UploadState) {
        self.state = state;
    }

    /// Returns true when the visible percentage moved forward.
    pub(crate) fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        match &mut self.state {
            UploadState::Transferring { progress_percent } => {
                if progress_percent.is_some_and(|current| current >= percent) {
                    return false;
                }
                *progress_percent = Some(percent);
                true
            }
            _ => false,
        }
    }
}

/// State change notification emitted by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadEvent {
    pub task_id: Uuid,
    pub state: UploadState,
    pub at: DateTime<Utc>,
}

/// How the storage write is performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferMethod {
    /// Multipart form: credential fields first, then the file part.
    #[default]
    Post,
    /// Raw body with the credential headers attached.
    Put,
}

/// Short-lived, single-use authorization to write one object.
#[derive(Clone, Deserialize)]
pub struct UploadCredential {
    pub url: String,
    #[serde(default)]
    pub method: TransferMethod,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub storage_path: String,
}

impl std::fmt::Debug for UploadCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Field values carry signatures.
        f.debug_struct("UploadCredential")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("storage_path", &self.storage_path)
            .finish()
    }
}

/// What the backend returns when a stored object is registered.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Ready(DatasetId),
    Pending(JobId),
}

/// Result of running the ingestion pipeline once.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Succeeded(DatasetId),
    Failed(UploadError),
}

impl UploadOutcome {
    pub fn dataset_id(&self) -> Option<&DatasetId> {
        match self {
            UploadOutcome::Succeeded(id) => Some(id),
            UploadOutcome::Failed(_) => None,
        }
    }
}
