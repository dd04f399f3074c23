use thiserror::Error;

/// Errors produced by the Recording Engine (C6).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is already recording")]
    AlreadyRecording,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio source failed: {0}")]
    AudioSourceFailed(String),

    #[error("recognizer failed: {0}")]
    RecognizerFailed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors produced by the Repository contract (C1).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepositoryError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| err.to_string()),
                )
            }
            _ => RepositoryError::Backend(e.to_string()),
        }
    }
}

/// Errors surfaced by the external collaborators (C2, C3, C4): audio
/// sources, recognizers, and summarization services.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("audio source error: {0}")]
    AudioSource(String),

    #[error("recognizer error: {0}")]
    Recognizer {
        message: String,
        /// Set by the recognizer contract when the error is the expected
        /// result of a `stop()`-driven cancellation, rather than a genuine
        /// failure. See spec.md §9 "Open question — cancellation marker":
        /// recognizers should report this explicitly rather than the engine
        /// string-matching the message.
        is_cancellation: bool,
    },

    #[error("summarization service error: {0}")]
    Summarizer(String),

    #[error("operation timed out")]
    Timeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
