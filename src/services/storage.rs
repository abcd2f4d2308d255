use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::sync::mpsc::UnboundedSender;

use crate::models::upload::{LocalFile, TransferMethod, UploadCredential};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Direct-to-storage writer driven by a backend-issued credential.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write `file` to the object named by `credential`.
    ///
    /// Cumulative bytes handed to the transport are sent on `progress` when
    /// the implementation can observe them. Implementations that cannot may
    /// simply drop the sender.
    async fn put_object(
        &self,
        credential: &UploadCredential,
        file: &LocalFile,
        progress: UnboundedSender<u64>,
    ) -> Result<(), StorageError>;
}

/// Uploads through presigned POST forms or presigned PUT URLs.
///
/// No bearer credential is attached; the signed fields or headers are the
/// only authorization storage sees.
pub struct PresignedUploader {
    http: Client,
    chunk_size: usize,
}

impl PresignedUploader {
    pub fn new(timeout: Duration) -> Result<Self, StorageError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self {
            http,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn content_type(file: &LocalFile) -> String {
        file.media_type()
            .map(str::to_string)
            .or_else(|| file.detect_kind().map(|k| k.media_type().to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }
}

/// Split the file into chunks, reporting the running byte count as each
/// chunk is pulled by the transport.
fn chunk_stream(
    contents: Arc<[u8]>,
    chunk_size: usize,
    progress: UnboundedSender<u64>,
) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    futures::stream::unfold(0usize, move |offset| {
        let contents = Arc::clone(&contents);
        let progress = progress.clone();
        async move {
            if offset >= contents.len() {
                return None;
            }
            let end = (offset + chunk_size).min(contents.len());
            let chunk = contents[offset..end].to_vec();
            // Receiver may be gone if the caller stopped listening.
            let _ = progress.send(end as u64);
            Some((Ok::<_, std::io::Error>(chunk), end))
        }
    })
}

#[async_trait]
impl ObjectStorage for PresignedUploader {
    async fn put_object(
        &self,
        credential: &UploadCredential,
        file: &LocalFile,
        progress: UnboundedSender<u64>,
    ) -> Result<(), StorageError> {
        let content_type = Self::content_type(file);
        let body = Body::wrap_stream(chunk_stream(
            Arc::clone(file.contents()),
            self.chunk_size,
            progress,
        ));

        let request = match credential.method {
            TransferMethod::Post => {
                // Policy fields must precede the file part.
                let mut form = Form::new();
                for (name, value) in &credential.fields {
                    form = form.text(name.clone(), value.clone());
                }
                let part = Part::stream_with_length(body, file.size())
                    .file_name(file.name().to_string())
                    .mime_str(&content_type)
                    .map_err(|e| StorageError::Config(e.to_string()))?;
                self.http
                    .post(&credential.url)
                    .multipart(form.part("file", part))
            }
            TransferMethod::Put => {
                let mut request = self
                    .http
                    .put(&credential.url)
                    .header(CONTENT_LENGTH, file.size());
                if !credential
                    .headers
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
                {
                    request = request.header(CONTENT_TYPE, &content_type);
                }
                for (name, value) in &credential.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                request.body(body)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        tracing::debug!(
            storage_path = %credential.storage_path,
            status = status.as_u16(),
            bytes = file.size(),
            "Storage write accepted"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage returned {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
