use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AttemptId, ExamId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("ends_at is before started_at")]
    InvalidTimeRange,

    #[error("attempt is already {status}")]
    AlreadyFinalized { status: AttemptStatus },

    #[error("cannot finalize an attempt as in_progress")]
    InvalidFinalStatus,
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of an attempt. Only `InProgress` accepts answer changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Expired,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Expired => "expired",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in_progress" => Some(Self::InProgress),
            "submitted" => Some(Self::Submitted),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

/// One user's run at an exam, bounded by a fixed end time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    id: AttemptId,
    exam_id: ExamId,
    exam_title: String,
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: AttemptStatus,
}

impl Attempt {
    /// Create an in-progress attempt.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidTimeRange` if `ends_at` is before `started_at`.
    pub fn new(
        id: AttemptId,
        exam_id: ExamId,
        exam_title: impl Into<String>,
        started_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<Self, AttemptError> {
        if ends_at < started_at {
            return Err(AttemptError::InvalidTimeRange);
        }
        Ok(Self {
            id,
            exam_id,
            exam_title: exam_title.into(),
            started_at,
            ends_at,
            status: AttemptStatus::InProgress,
        })
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    #[must_use]
    pub fn exam_title(&self) -> &str {
        &self.exam_title
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    /// Total allotted time.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.ends_at - self.started_at
    }

    /// Freeze the attempt as `Submitted` or `Expired`.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::AlreadyFinalized` if the attempt is no longer in progress.
    /// Returns `AttemptError::InvalidFinalStatus` when asked to finalize as `InProgress`.
    pub fn finalize(&mut self, status: AttemptStatus) -> Result<(), AttemptError> {
        if status == AttemptStatus::InProgress {
            return Err(AttemptError::InvalidFinalStatus);
        }
        if !self.is_in_progress() {
            return Err(AttemptError::AlreadyFinalized {
                status: self.status,
            });
        }
        self.status = status;
        Ok(())
    }
}
