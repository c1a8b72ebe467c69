use chrono::Duration;
use thiserror::Error;

use crate::model::ids::ExamId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamError {
    #[error("exam title cannot be empty")]
    EmptyTitle,

    #[error("exam duration must be > 0 seconds")]
    InvalidDuration,
}

/// Catalogue entry for an exam. Each attempt gets `duration` from its start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exam {
    id: ExamId,
    title: String,
    duration_secs: u32,
}

impl Exam {
    /// # Errors
    ///
    /// Returns `ExamError::EmptyTitle` for a blank title and
    /// `ExamError::InvalidDuration` for a zero duration.
    pub fn new(
        id: ExamId,
        title: impl Into<String>,
        duration_secs: u32,
    ) -> Result<Self, ExamError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(ExamError::EmptyTitle);
        }
        if duration_secs == 0 {
            return Err(ExamError::InvalidDuration);
        }
        Ok(Self {
            id,
            title,
            duration_secs,
        })
    }

    #[must_use]
    pub fn id(&self) -> ExamId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::seconds(i64::from(self.duration_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_title_and_validates_duration() {
        let exam = Exam::new(ExamId::new(1), "  Physics ", 3600).unwrap();
        assert_eq!(exam.title(), "Physics");
        assert_eq!(exam.duration(), Duration::hours(1));

        assert_eq!(Exam::new(ExamId::new(1), " ", 60), Err(ExamError::EmptyTitle));
        assert_eq!(Exam::new(ExamId::new(1), "x", 0), Err(ExamError::InvalidDuration));
    }
}
