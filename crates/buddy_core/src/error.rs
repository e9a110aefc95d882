use thiserror::Error;

/// The only failures ingestion reports to its caller. Classifier and reply
/// generator problems are absorbed inside the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("message text is empty")]
    EmptyText,
    #[error("failed to persist subject utterance: {0}")]
    Persist(#[source] anyhow::Error),
}

impl IngestError {
    /// Whether the caller should resend the same message.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Persist(_))
    }
}
