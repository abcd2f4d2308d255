/// Caller-contract violations.
///
/// These are raised before any network call is made. Everything that can go
/// wrong after that point is folded into a terminal `Failed` state instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UsageError {
    #[error("Invalid session context: {0}")]
    InvalidSession(String),

    #[error("Invalid job identifier {id:?}: {reason}")]
    InvalidJobId { id: String, reason: &'static str },

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Invalid dataset identifier: {0}")]
    InvalidDatasetId(String),

    #[error("Invalid poll settings: {0}")]
    InvalidPollSettings(&'static str),

    #[error("Upload task {0} already succeeded; start a new task to upload again")]
    UploadAlreadySucceeded(uuid::Uuid),
}
