use std::collections::{BTreeMap, BTreeSet};

use exam_core::model::{
    AnswerEntry, AnswerSubmission, AnswerValue, Attempt, AttemptError, AttemptStatus, Question,
    QuestionId,
};
use exam_core::navigation::Navigation;

/// Authoritative in-memory state of one attempt.
///
/// Every user action lands here first. Persistence reads dirty snapshots out
/// of the controller and reports back what the server accepted, so the
/// controller never waits on I/O.
#[derive(Debug, Clone)]
pub struct SessionController {
    attempt: Attempt,
    questions: Vec<Question>,
    navigation: Navigation,
    answers: BTreeMap<QuestionId, AnswerEntry>,
    review_marks: BTreeSet<QuestionId>,
    finalizing: bool,
}

impl SessionController {
    /// Build a controller over the attempt's question set.
    ///
    /// Correct answers are stripped; the session never holds them.
    #[must_use]
    pub fn new(attempt: Attempt, questions: Vec<Question>) -> Self {
        let questions: Vec<Question> = questions.into_iter().map(Question::redacted).collect();
        Self {
            navigation: Navigation::new(questions.len()),
            attempt,
            questions,
            answers: BTreeMap::new(),
            review_marks: BTreeSet::new(),
            finalizing: false,
        }
    }

    #[must_use]
    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        self.attempt.status()
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.questions.len()
    }

    /// True while user mutations are accepted.
    #[must_use]
    pub fn accepts_mutations(&self) -> bool {
        self.attempt.is_in_progress() && !self.finalizing
    }

    fn contains(&self, question_id: QuestionId) -> bool {
        self.questions.iter().any(|q| q.id() == question_id)
    }

    //
    // ─── ANSWERS ───────────────────────────────────────────────────────────────
    //

    /// Record an answer. The latest value wins.
    ///
    /// Returns `false` when the question is unknown or the attempt no longer
    /// accepts changes.
    pub fn set_answer(&mut self, question_id: QuestionId, value: AnswerValue) -> bool {
        if !self.accepts_mutations() || !self.contains(question_id) {
            return false;
        }
        self.answers
            .entry(question_id)
            .and_modify(|entry| entry.set(value.clone()))
            .or_insert_with(|| AnswerEntry::new(value));
        true
    }

    #[must_use]
    pub fn answer(&self, question_id: QuestionId) -> Option<&AnswerValue> {
        self.answers.get(&question_id).map(AnswerEntry::value)
    }

    #[must_use]
    pub fn answers(&self) -> BTreeMap<QuestionId, AnswerValue> {
        self.answers
            .iter()
            .map(|(id, entry)| (*id, entry.value().clone()))
            .collect()
    }

    /// Questions with a non-blank answer.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers
            .values()
            .filter(|entry| !entry.value().is_blank())
            .count()
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.answers.values().filter(|entry| entry.is_dirty()).count()
    }

    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.answers.values().any(AnswerEntry::is_dirty)
    }

    /// Current value of every entry not yet confirmed by the server.
    #[must_use]
    pub fn dirty_snapshot(&self) -> Vec<AnswerSubmission> {
        self.answers
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(id, entry)| AnswerSubmission::new(*id, entry.value().clone()))
            .collect()
    }

    /// Record that the server accepted `saved`.
    ///
    /// An entry edited after the snapshot was taken stays dirty, because its
    /// value no longer equals what was saved.
    pub fn mark_persisted(&mut self, saved: &[AnswerSubmission]) {
        for submission in saved {
            if let Some(entry) = self.answers.get_mut(&submission.question_id) {
                entry.mark_persisted(&submission.value);
            }
        }
    }

    //
    // ─── REVIEW MARKS ──────────────────────────────────────────────────────────
    //

    /// Flip the review flag. Returns `false` if the toggle was refused.
    pub fn toggle_review(&mut self, question_id: QuestionId) -> bool {
        if !self.accepts_mutations() || !self.contains(question_id) {
            return false;
        }
        if !self.review_marks.remove(&question_id) {
            self.review_marks.insert(question_id);
        }
        true
    }

    #[must_use]
    pub fn is_marked(&self, question_id: QuestionId) -> bool {
        self.review_marks.contains(&question_id)
    }

    #[must_use]
    pub fn review_marks(&self) -> &BTreeSet<QuestionId> {
        &self.review_marks
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.navigation.current()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.navigation.current())
    }

    /// Jump to `index`, clamped into range. Navigation stays open after
    /// submission so answers can still be viewed.
    pub fn go_to(&mut self, index: i64) -> usize {
        self.navigation.go_to(index)
    }

    pub fn next(&mut self) -> usize {
        self.navigation.next()
    }

    pub fn previous(&mut self) -> usize {
        self.navigation.previous()
    }

    //
    // ─── FINALIZATION ──────────────────────────────────────────────────────────
    //

    /// Close mutations while a submission is in flight.
    pub fn begin_finalization(&mut self) {
        self.finalizing = true;
    }

    /// Reopen mutations after a failed submission.
    pub fn abort_finalization(&mut self) {
        self.finalizing = false;
    }

    /// Move the attempt to its terminal status.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError` if the attempt is already final or `status` is
    /// not terminal.
    pub fn finalize(&mut self, status: AttemptStatus) -> Result<(), AttemptError> {
        self.attempt.finalize(status)?;
        self.finalizing = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use exam_core::model::{AttemptId, ExamId, QuestionKind};
    use exam_core::time::fixed_now;

    fn controller(count: u64) -> SessionController {
        let attempt = Attempt::new(
            AttemptId::new(1),
            ExamId::new(1),
            "Quiz",
            fixed_now(),
            fixed_now() + Duration::minutes(30),
        )
        .unwrap();
        let questions = (1..=count)
            .map(|id| {
                Question::new(
                    QuestionId::new(id),
                    QuestionKind::ShortAnswer,
                    format!("Q{id}"),
                    Vec::new(),
                    1,
                )
                .unwrap()
                .with_correct_answer(AnswerValue::text("secret"))
            })
            .collect();
        SessionController::new(attempt, questions)
    }

    fn q(id: u64) -> QuestionId {
        QuestionId::new(id)
    }

    #[test]
    fn correct_answers_are_never_held() {
        let c = controller(3);
        assert!(c.questions().iter().all(|q| q.correct_answer().is_none()));
    }

    #[test]
    fn last_write_wins_and_only_latest_is_dirty() {
        let mut c = controller(3);
        assert!(c.set_answer(q(1), AnswerValue::choice("A")));
        assert!(c.set_answer(q(1), AnswerValue::choice("B")));

        assert_eq!(c.answer(q(1)), Some(&AnswerValue::choice("B")));
        assert_eq!(
            c.dirty_snapshot(),
            vec![AnswerSubmission::new(q(1), AnswerValue::choice("B"))]
        );
    }

    #[test]
    fn unknown_question_is_rejected() {
        let mut c = controller(2);
        assert!(!c.set_answer(q(9), AnswerValue::text("x")));
        assert!(!c.toggle_review(q(9)));
        assert!(!c.has_pending_work());
    }

    #[test]
    fn edit_during_flight_stays_dirty() {
        let mut c = controller(3);
        c.set_answer(q(1), AnswerValue::text("a"));
        c.set_answer(q(2), AnswerValue::text("b"));
        let snapshot = c.dirty_snapshot();

        c.set_answer(q(2), AnswerValue::text("b2"));
        c.set_answer(q(3), AnswerValue::text("c"));
        c.mark_persisted(&snapshot);

        assert_eq!(
            c.dirty_snapshot(),
            vec![
                AnswerSubmission::new(q(2), AnswerValue::text("b2")),
                AnswerSubmission::new(q(3), AnswerValue::text("c")),
            ]
        );
    }

    #[test]
    fn restoring_saved_value_clears_dirty_flag() {
        let mut c = controller(1);
        c.set_answer(q(1), AnswerValue::text("a"));
        let snapshot = c.dirty_snapshot();
        c.mark_persisted(&snapshot);
        assert!(!c.has_pending_work());

        c.set_answer(q(1), AnswerValue::text("b"));
        assert_eq!(c.dirty_count(), 1);
        c.set_answer(q(1), AnswerValue::text("a"));
        assert_eq!(c.dirty_count(), 0);
    }

    #[test]
    fn cleared_answer_counts_as_unanswered_but_is_sent() {
        let mut c = controller(2);
        c.set_answer(q(1), AnswerValue::text("a"));
        let snapshot = c.dirty_snapshot();
        c.mark_persisted(&snapshot);
        c.set_answer(q(1), AnswerValue::text("  "));

        assert_eq!(c.answered_count(), 0);
        assert_eq!(c.dirty_snapshot().len(), 1);
    }

    #[test]
    fn review_marks_toggle() {
        let mut c = controller(2);
        assert!(c.toggle_review(q(2)));
        assert!(c.is_marked(q(2)));
        assert!(c.toggle_review(q(2)));
        assert!(!c.is_marked(q(2)));
    }

    #[test]
    fn navigation_clamps_past_the_end() {
        let mut c = controller(10);
        assert_eq!(c.go_to(999), 9);
        assert_eq!(c.go_to(999), 9);
        assert_eq!(c.current_question().map(Question::id), Some(q(10)));
        assert_eq!(c.next(), 9);
        assert_eq!(c.go_to(-4), 0);
        assert_eq!(c.previous(), 0);
    }

    #[test]
    fn finalization_closes_mutations() {
        let mut c = controller(2);
        c.begin_finalization();
        assert!(!c.set_answer(q(1), AnswerValue::text("late")));
        assert!(!c.toggle_review(q(1)));

        c.abort_finalization();
        assert!(c.set_answer(q(1), AnswerValue::text("retry")));

        c.finalize(AttemptStatus::Submitted).unwrap();
        assert!(!c.set_answer(q(1), AnswerValue::text("after")));
        assert_eq!(c.answer(q(1)), Some(&AnswerValue::text("retry")));
        // navigation stays usable for reviewing answers
        assert_eq!(c.go_to(1), 1);

        let err = c.finalize(AttemptStatus::Expired).unwrap_err();
        assert!(matches!(err, AttemptError::AlreadyFinalized { .. }));
    }
}
