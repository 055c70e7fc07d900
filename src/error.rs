use uuid::Uuid;

/// Errors surfaced by the workflow engine.
///
/// Transient executor failures are retried internally with backoff and only
/// become visible as [`EngineError::MaxRetriesExceeded`] once exhausted.
/// A dependency that is simply not satisfied yet is a scheduling skip, not an
/// error, and has no variant here.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Corrupted session data for {session_id}: {reason}")]
    CorruptedSessionData { session_id: Uuid, reason: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(Uuid),

    #[error("No queue exists for session {0}")]
    QueueNotFound(Uuid),

    #[error("Checkpoint {checkpoint_id} exhausted {max_retries} retries: {last_error}")]
    MaxRetriesExceeded {
        checkpoint_id: Uuid,
        max_retries: u32,
        last_error: String,
    },

    #[error("Executor failed running {function_name}: {message}")]
    ExecutorFailure {
        function_name: String,
        message: String,
    },

    #[error("Step {step} requires {missing} to be completed first")]
    PrerequisiteNotMet { step: String, missing: String },

    #[error("Invalid parameters for {function_name}: {reason}")]
    InvalidParameters {
        function_name: String,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
