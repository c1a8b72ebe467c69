//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::AttemptError;
use storage::repository::StorageError;

/// Errors emitted by exam session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("exam has no questions")]
    EmptyExam,
    #[error("finishing the attempt failed: {0}")]
    Finish(StorageError),
    #[error("submission is only retryable after a failed attempt")]
    NotRetryable,
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// True when calling submit again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Finish(_))
    }
}
