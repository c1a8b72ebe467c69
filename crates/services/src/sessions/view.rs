use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use exam_core::model::{
    AnswerValue, AttemptId, AttemptStatus, Question, QuestionId, ViolationKind,
};
use exam_core::timer::TimerPhase;

use super::submission::SubmissionState;

/// Persistence health, shown next to the question so the user knows whether
/// their work is safe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveStatus {
    pub last_saved_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Entries not yet confirmed by the server.
    pub pending: usize,
    pub in_flight: bool,
}

impl SaveStatus {
    /// Time since the last successful save, if there ever was one.
    #[must_use]
    pub fn since_last_save(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_saved_at
            .map(|at| (now - at).max(Duration::zero()))
    }

    /// Short human-readable line for the status bar.
    #[must_use]
    pub fn label(&self, now: DateTime<Utc>) -> String {
        if self.in_flight {
            return "Saving...".to_owned();
        }
        if self.pending == 0 {
            return "All changes saved".to_owned();
        }
        if self.consecutive_failures == 0 {
            return "Unsaved changes".to_owned();
        }
        match self.since_last_save(now) {
            Some(elapsed) => format!("Not saved for {}s", elapsed.num_seconds()),
            None => "Not saved yet".to_owned(),
        }
    }
}

/// Notifications broadcast to whoever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Warning {
        phase: TimerPhase,
        remaining: String,
    },
    Expired,
    Saved {
        count: usize,
        at: DateTime<Utc>,
    },
    SaveFailed {
        count: usize,
        consecutive_failures: u32,
    },
    ViolationRecorded {
        kind: ViolationKind,
        total: usize,
    },
    Submitted {
        status: AttemptStatus,
    },
    SubmitFailed {
        reason: String,
    },
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub attempt_id: AttemptId,
    pub exam_title: String,
    pub status: AttemptStatus,
    pub current_index: usize,
    pub total: usize,
    pub current_question: Option<Question>,
    pub answers: BTreeMap<QuestionId, AnswerValue>,
    pub review_marks: BTreeSet<QuestionId>,
    pub answered: usize,
    pub remaining: String,
    pub timer_phase: TimerPhase,
    pub save: SaveStatus,
    pub violation_count: usize,
    pub submission: SubmissionState,
}

impl SessionView {
    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.total.saturating_sub(self.answered)
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.status != AttemptStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::time::fixed_now;

    #[test]
    fn label_reports_stale_saves() {
        let mut status = SaveStatus {
            last_saved_at: Some(fixed_now()),
            consecutive_failures: 2,
            pending: 3,
            in_flight: false,
        };
        assert_eq!(
            status.label(fixed_now() + Duration::seconds(45)),
            "Not saved for 45s"
        );

        status.in_flight = true;
        assert_eq!(status.label(fixed_now()), "Saving...");

        status = SaveStatus::default();
        assert_eq!(status.label(fixed_now()), "All changes saved");
        assert_eq!(status.since_last_save(fixed_now()), None);
    }
}
