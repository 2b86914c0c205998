//! Error taxonomy shared by every orchestrator component.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::JobState;

/// Result type for orchestrator operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors returned by orchestrator components.
///
/// `Validation`, `Conflict` and `RecoveryMiss` are returned synchronously to
/// callers. Engine and storage failures raised inside an orchestration task
/// are recorded on the job record instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("job '{0}' is already pending or running")]
    Conflict(String),
    #[error("engine not found: {0}")]
    EngineNotFound(String),
    #[error("engine execution timed out after {timeout_ms}ms")]
    ProcessTimeout { timeout_ms: u64 },
    #[error("engine exited with status {exit_code}: {stderr}")]
    ProcessFailure { exit_code: i32, stderr: String },
    #[error("failed to parse engine output as json ({parse_error}): {stdout_excerpt}")]
    OutputFormat {
        parse_error: String,
        stdout_excerpt: String,
    },
    #[error("engine reported failure: {0}")]
    EngineRejected(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("'{0}' not found")]
    RecoveryMiss(String),
    #[error("invalid job transition for '{id}': {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },
    #[error("job '{0}' is not registered")]
    UnknownJob(String),
}

impl JobError {
    /// Builds a storage error from any displayable cause, keeping its context chain.
    pub fn storage(error: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{error:#}"))
    }

    /// Returns the stable classification tag for this error.
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::Validation(_) => JobErrorKind::ValidationError,
            Self::Conflict(_) => JobErrorKind::Conflict,
            Self::EngineNotFound(_) => JobErrorKind::EngineNotFound,
            Self::ProcessTimeout { .. } => JobErrorKind::ProcessTimeout,
            Self::ProcessFailure { .. } => JobErrorKind::ProcessFailure,
            Self::OutputFormat { .. } => JobErrorKind::OutputFormatError,
            Self::EngineRejected(_) => JobErrorKind::EngineRejected,
            Self::Storage(_) => JobErrorKind::StorageError,
            Self::RecoveryMiss(_) => JobErrorKind::RecoveryMiss,
            Self::InvalidTransition { .. } | Self::UnknownJob(_) => JobErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Wire classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    ValidationError,
    Conflict,
    EngineNotFound,
    ProcessTimeout,
    ProcessFailure,
    OutputFormatError,
    EngineRejected,
    StorageError,
    RecoveryMiss,
    Internal,
}

impl JobErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::Conflict => "conflict",
            Self::EngineNotFound => "engine_not_found",
            Self::ProcessTimeout => "process_timeout",
            Self::ProcessFailure => "process_failure",
            Self::OutputFormatError => "output_format_error",
            Self::EngineRejected => "engine_rejected",
            Self::StorageError => "storage_error",
            Self::RecoveryMiss => "recovery_miss",
            Self::Internal => "internal",
        }
    }
}

/// Classified failure stored on a `Failed` job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: JobErrorKind,
    pub message: String,
}

impl From<&JobError> for JobFailure {
    fn from(error: &JobError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<JobError> for JobFailure {
    fn from(error: JobError) -> Self {
        Self::from(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::{JobError, JobErrorKind, JobFailure};

    #[test]
    fn unit_process_failure_message_carries_exit_code_and_stderr() {
        let failure = JobFailure::from(JobError::ProcessFailure {
            exit_code: 3,
            stderr: "bad column index".to_string(),
        });
        assert_eq!(failure.kind, JobErrorKind::ProcessFailure);
        assert!(failure.message.contains('3'));
        assert!(failure.message.contains("bad column index"));
    }

    #[test]
    fn unit_error_kind_serializes_as_snake_case_tag() {
        let encoded =
            serde_json::to_string(&JobErrorKind::OutputFormatError).expect("encode error kind");
        assert_eq!(encoded, "\"output_format_error\"");
        assert_eq!(
            JobErrorKind::ProcessTimeout.as_str(),
            JobError::ProcessTimeout { timeout_ms: 1_000 }.kind().as_str()
        );
    }
}
