use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerSubmission, AnswerValue, Attempt, AttemptError, AttemptId, AttemptStatus, Exam, ExamId,
    Question, QuestionId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Result of opening a new attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedAttempt {
    pub attempt_id: AttemptId,
    pub exam_title: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl StartedAttempt {
    /// Build the in-progress domain attempt.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::InvalidTimeRange` if the backend produced an inverted range.
    pub fn into_attempt(self, exam_id: ExamId) -> Result<Attempt, AttemptError> {
        Attempt::new(
            self.attempt_id,
            exam_id,
            self.exam_title,
            self.started_at,
            self.ends_at,
        )
    }
}

/// Persisted shape of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub id: AttemptId,
    pub exam_id: ExamId,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A batch of answers flushed in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerBatch {
    pub attempt_id: AttemptId,
    pub answers: Vec<AnswerSubmission>,
}

/// Server-side view of how far an attempt has got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptProgress {
    pub answered_count: u32,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Catalogue write side used to author and seed exams.
#[async_trait]
pub trait ExamRepository: Send + Sync {
    /// Persist or update an exam.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the exam cannot be stored.
    async fn upsert_exam(&self, exam: &Exam) -> Result<(), StorageError>;

    /// Fetch an exam by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_exam(&self, id: ExamId) -> Result<Exam, StorageError>;

    /// Persist or update a question at the given position of the exam.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the exam does not exist.
    async fn upsert_question(
        &self,
        exam_id: ExamId,
        position: u32,
        question: &Question,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Ordered questions for an attempt, with correct answers withheld.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt does not belong to the exam.
    async fn fetch_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, StorageError>;

    /// Ordered questions including correct answers, for reviewing a finished attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` while the attempt is still in progress.
    async fn review_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Open a new attempt whose deadline is `started_at` plus the exam duration.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the exam does not exist.
    async fn start_attempt(
        &self,
        exam_id: ExamId,
        started_at: DateTime<Utc>,
    ) -> Result<StartedAttempt, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt does not belong to the exam.
    async fn get_attempt(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptRecord, StorageError>;

    /// Count of non-blank answers stored for the attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt does not belong to the exam.
    async fn fetch_progress(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptProgress, StorageError>;

    /// Close the attempt. Finishing an already submitted attempt succeeds without change.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt does not belong to the exam.
    async fn finish_attempt(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait AnswerRepository: Send + Sync {
    /// Upsert every answer in the batch; later values replace earlier ones.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the attempt is no longer in progress.
    async fn submit_answers_batch(
        &self,
        exam_id: ExamId,
        batch: &AnswerBatch,
    ) -> Result<(), StorageError>;

    /// Answers currently stored for the attempt, ordered by question id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    async fn saved_answers(&self, attempt_id: AttemptId)
    -> Result<Vec<AnswerSubmission>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    exams: HashMap<ExamId, Exam>,
    questions: HashMap<ExamId, BTreeMap<(u32, QuestionId), Question>>,
    attempts: HashMap<AttemptId, AttemptRecord>,
    answers: HashMap<AttemptId, BTreeMap<QuestionId, AnswerValue>>,
    next_attempt_id: u64,
}

impl MemoryState {
    fn attempt(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<&AttemptRecord, StorageError> {
        self.attempts
            .get(&attempt_id)
            .filter(|record| record.exam_id == exam_id)
            .ok_or(StorageError::NotFound)
    }

    fn ordered_questions(&self, exam_id: ExamId) -> Vec<Question> {
        self.questions
            .get(&exam_id)
            .map(|qs| qs.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ExamRepository for InMemoryRepository {
    async fn upsert_exam(&self, exam: &Exam) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.exams.insert(exam.id(), exam.clone());
        Ok(())
    }

    async fn get_exam(&self, id: ExamId) -> Result<Exam, StorageError> {
        let guard = self.lock()?;
        guard.exams.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn upsert_question(
        &self,
        exam_id: ExamId,
        position: u32,
        question: &Question,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.exams.contains_key(&exam_id) {
            return Err(StorageError::NotFound);
        }
        let questions = guard.questions.entry(exam_id).or_default();
        questions.retain(|(_, id), _| *id != question.id());
        questions.insert((position, question.id()), question.clone());
        Ok(())
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn fetch_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, StorageError> {
        let guard = self.lock()?;
        guard.attempt(exam_id, attempt_id)?;
        Ok(guard
            .ordered_questions(exam_id)
            .into_iter()
            .map(Question::redacted)
            .collect())
    }

    async fn review_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, StorageError> {
        let guard = self.lock()?;
        if guard.attempt(exam_id, attempt_id)?.status == AttemptStatus::InProgress {
            return Err(StorageError::Conflict);
        }
        Ok(guard.ordered_questions(exam_id))
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn start_attempt(
        &self,
        exam_id: ExamId,
        started_at: DateTime<Utc>,
    ) -> Result<StartedAttempt, StorageError> {
        let mut guard = self.lock()?;
        let exam = guard.exams.get(&exam_id).cloned().ok_or(StorageError::NotFound)?;

        guard.next_attempt_id += 1;
        let attempt_id = AttemptId::new(guard.next_attempt_id);
        let ends_at = started_at + exam.duration();
        guard.attempts.insert(
            attempt_id,
            AttemptRecord {
                id: attempt_id,
                exam_id,
                started_at,
                ends_at,
                status: AttemptStatus::InProgress,
                finished_at: None,
            },
        );

        Ok(StartedAttempt {
            attempt_id,
            exam_title: exam.title().to_owned(),
            started_at,
            ends_at,
        })
    }

    async fn get_attempt(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptRecord, StorageError> {
        let guard = self.lock()?;
        guard.attempt(exam_id, attempt_id).cloned()
    }

    async fn fetch_progress(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptProgress, StorageError> {
        let guard = self.lock()?;
        guard.attempt(exam_id, attempt_id)?;
        let answered = guard
            .answers
            .get(&attempt_id)
            .map_or(0, |answers| answers.values().filter(|v| !v.is_blank()).count());
        Ok(AttemptProgress {
            answered_count: u32::try_from(answered).unwrap_or(u32::MAX),
        })
    }

    async fn finish_attempt(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard.attempt(exam_id, attempt_id)?;
        let Some(record) = guard.attempts.get_mut(&attempt_id) else {
            return Err(StorageError::NotFound);
        };
        if record.status == AttemptStatus::InProgress {
            record.status = if finished_at >= record.ends_at {
                AttemptStatus::Expired
            } else {
                AttemptStatus::Submitted
            };
            record.finished_at = Some(finished_at);
        }
        Ok(())
    }
}

#[async_trait]
impl AnswerRepository for InMemoryRepository {
    async fn submit_answers_batch(
        &self,
        exam_id: ExamId,
        batch: &AnswerBatch,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.attempt(exam_id, batch.attempt_id)?.status != AttemptStatus::InProgress {
            return Err(StorageError::Conflict);
        }
        let answers = guard.answers.entry(batch.attempt_id).or_default();
        for answer in &batch.answers {
            answers.insert(answer.question_id, answer.value.clone());
        }
        Ok(())
    }

    async fn saved_answers(
        &self,
        attempt_id: AttemptId,
    ) -> Result<Vec<AnswerSubmission>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .answers
            .get(&attempt_id)
            .map(|answers| {
                answers
                    .iter()
                    .map(|(id, value)| AnswerSubmission::new(*id, value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Aggregates the exam collaborators behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub exams: Arc<dyn ExamRepository>,
    pub questions: Arc<dyn QuestionRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub answers: Arc<dyn AnswerRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            exams: Arc::new(repo.clone()),
            questions: Arc::new(repo.clone()),
            attempts: Arc::new(repo.clone()),
            answers: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use exam_core::model::{QuestionKind, QuestionOption};
    use exam_core::time::fixed_now;

    fn question(id: u64) -> Question {
        Question::new(
            QuestionId::new(id),
            QuestionKind::SingleChoice,
            format!("Q{id}"),
            vec![QuestionOption::new("A", "a"), QuestionOption::new("B", "b")],
            1,
        )
        .unwrap()
        .with_correct_answer(AnswerValue::choice("A"))
    }

    async fn seeded() -> (InMemoryRepository, ExamId) {
        let repo = InMemoryRepository::new();
        let exam = Exam::new(ExamId::new(1), "Quiz", 600).unwrap();
        repo.upsert_exam(&exam).await.unwrap();
        repo.upsert_question(exam.id(), 2, &question(20)).await.unwrap();
        repo.upsert_question(exam.id(), 1, &question(10)).await.unwrap();
        (repo, exam.id())
    }

    #[tokio::test]
    async fn start_attempt_sets_deadline_from_duration() {
        let (repo, exam_id) = seeded().await;
        let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();

        assert_eq!(started.exam_title, "Quiz");
        assert_eq!(started.ends_at, fixed_now() + Duration::minutes(10));
        let attempt = started.into_attempt(exam_id).unwrap();
        assert!(attempt.is_in_progress());
    }

    #[tokio::test]
    async fn questions_are_ordered_and_redacted() {
        let (repo, exam_id) = seeded().await;
        let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();

        let questions = repo.fetch_questions(exam_id, started.attempt_id).await.unwrap();
        let ids: Vec<_> = questions.iter().map(Question::id).collect();
        assert_eq!(ids, vec![QuestionId::new(10), QuestionId::new(20)]);
        assert!(questions.iter().all(|q| q.correct_answer().is_none()));

        let err = repo.review_questions(exam_id, started.attempt_id).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn batches_upsert_and_finish_closes_attempt() {
        let (repo, exam_id) = seeded().await;
        let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();
        let batch = |value: &str| AnswerBatch {
            attempt_id: started.attempt_id,
            answers: vec![AnswerSubmission::new(QuestionId::new(10), AnswerValue::choice(value))],
        };

        repo.submit_answers_batch(exam_id, &batch("A")).await.unwrap();
        repo.submit_answers_batch(exam_id, &batch("B")).await.unwrap();
        let saved = repo.saved_answers(started.attempt_id).await.unwrap();
        assert_eq!(
            saved,
            vec![AnswerSubmission::new(QuestionId::new(10), AnswerValue::choice("B"))]
        );
        assert_eq!(
            repo.fetch_progress(exam_id, started.attempt_id).await.unwrap().answered_count,
            1
        );

        repo.finish_attempt(exam_id, started.attempt_id, fixed_now()).await.unwrap();
        repo.finish_attempt(exam_id, started.attempt_id, fixed_now()).await.unwrap();
        let record = repo.get_attempt(exam_id, started.attempt_id).await.unwrap();
        assert_eq!(record.status, AttemptStatus::Submitted);

        let err = repo.submit_answers_batch(exam_id, &batch("A")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(repo.review_questions(exam_id, started.attempt_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn attempt_from_other_exam_is_not_found() {
        let (repo, exam_id) = seeded().await;
        let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();

        let err = repo
            .fetch_questions(ExamId::new(99), started.attempt_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }
}
