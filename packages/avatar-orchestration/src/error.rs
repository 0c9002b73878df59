use avatar_storage::{JobStatus, StorageError};
use thiserror::Error;

use crate::clients::{SynthesisError, VideoClientError};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that halt the current operation.
///
/// Terminal job outcomes (generation, discovery and merge failures) are not
/// errors: they are persisted on the job as a `FailureReason`.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Bad caller input; nothing was written
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Conditional update on job {job_id} lost: expected {expected}, found {current}")]
    ConditionFailed {
        job_id: uuid::Uuid,
        expected: JobStatus,
        current: JobStatus,
    },

    #[error("Speech synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Video client error: {0}")]
    Video(#[from] VideoClientError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

impl OrchestratorError {
    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn job_not_found(job_id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(job_id.to_string())
    }

    pub fn invalid_transition(from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Retry classification of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::UpstreamUnavailable(_)
            | OrchestratorError::ConditionFailed { .. } => ErrorCategory::Transient,
            OrchestratorError::Synthesis(e) if e.is_transient() => ErrorCategory::Transient,
            OrchestratorError::Video(e) if e.is_transient() => ErrorCategory::Transient,
            OrchestratorError::Storage(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - resolved by a later reconciliation cycle
    Transient,
    /// Permanent error - retrying with the same input cannot succeed
    Permanent,
    /// Infrastructure error - alert ops (e.g., store unreachable, disk full)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "permanent" => Ok(ErrorCategory::Permanent),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(OrchestratorError::validation(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
