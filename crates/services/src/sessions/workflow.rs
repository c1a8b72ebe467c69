use std::sync::Arc;

use exam_core::model::{AttemptId, ExamId, Question, SessionSettings};
use storage::repository::{
    AnswerRepository, AttemptProgress, AttemptRepository, QuestionRepository, Storage,
};
use tracing::{info, warn};

use super::integrity::EnvironmentBus;
use super::runtime::{ExamSession, SessionDeps};
use crate::Clock;
use crate::error::SessionError;

/// Starts attempts and hands back running sessions.
#[derive(Clone)]
pub struct ExamSessionService {
    clock: Clock,
    settings: SessionSettings,
    questions: Arc<dyn QuestionRepository>,
    attempts: Arc<dyn AttemptRepository>,
    answers: Arc<dyn AnswerRepository>,
}

impl ExamSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionRepository>,
        attempts: Arc<dyn AttemptRepository>,
        answers: Arc<dyn AnswerRepository>,
    ) -> Self {
        Self {
            clock,
            settings: SessionSettings::default(),
            questions,
            attempts,
            answers,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.attempts),
            Arc::clone(&storage.answers),
        )
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new attempt and launch its session.
    ///
    /// The session subscribes to `bus` for integrity signals.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the attempt cannot be started or
    /// its questions loaded, and `SessionError::EmptyExam` for an exam
    /// without questions. The attempt opened for an empty exam is finished
    /// before returning.
    pub async fn start_session(
        &self,
        exam_id: ExamId,
        bus: &EnvironmentBus,
    ) -> Result<ExamSession, SessionError> {
        let started = self
            .attempts
            .start_attempt(exam_id, self.clock.now())
            .await?;
        let attempt = started.into_attempt(exam_id)?;
        let questions = self
            .questions
            .fetch_questions(exam_id, attempt.id())
            .await?;
        if questions.is_empty() {
            warn!(%exam_id, attempt_id = %attempt.id(), "exam has no questions; closing attempt");
            // Leave no in-progress attempt behind for an exam nobody can take.
            if let Err(err) = self
                .attempts
                .finish_attempt(exam_id, attempt.id(), self.clock.now())
                .await
            {
                warn!(%exam_id, attempt_id = %attempt.id(), error = %err, "closing empty attempt failed");
            }
            return Err(SessionError::EmptyExam);
        }
        info!(
            %exam_id,
            attempt_id = %attempt.id(),
            questions = questions.len(),
            ends_at = %attempt.ends_at(),
            "attempt started"
        );

        Ok(ExamSession::launch(
            attempt,
            questions,
            SessionDeps {
                clock: self.clock.clone(),
                attempts: Arc::clone(&self.attempts),
                answers: Arc::clone(&self.answers),
            },
            &self.settings,
            bus,
        ))
    }

    /// Server-side count of answered questions.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the attempt is unknown.
    pub async fn fetch_progress(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptProgress, SessionError> {
        Ok(self.attempts.fetch_progress(exam_id, attempt_id).await?)
    }

    /// Questions with correct answers, for a finished attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` while the attempt is still in progress.
    pub async fn review_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, SessionError> {
        Ok(self.questions.review_questions(exam_id, attempt_id).await?)
    }
}
