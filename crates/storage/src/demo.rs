//! Sample exam content for local runs and smoke tests.

use exam_core::model::{
    AnswerValue, Exam, ExamError, ExamId, Question, QuestionError, QuestionId, QuestionKind,
    QuestionOption,
};
use thiserror::Error;

use crate::repository::{ExamRepository, StorageError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SeedError {
    #[error(transparent)]
    Exam(#[from] ExamError),
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn options(pairs: &[(&str, &str)]) -> Vec<QuestionOption> {
    pairs
        .iter()
        .map(|(key, text)| QuestionOption::new(*key, *text))
        .collect()
}

/// Build the demo question list, correct answers included.
///
/// # Errors
///
/// Returns `QuestionError` if a sample question fails validation.
pub fn demo_questions() -> Result<Vec<Question>, QuestionError> {
    Ok(vec![
        Question::new(
            QuestionId::new(1),
            QuestionKind::SingleChoice,
            "Which planet is closest to the sun?",
            options(&[("A", "Venus"), ("B", "Mercury"), ("C", "Mars"), ("D", "Earth")]),
            1,
        )?
        .with_correct_answer(AnswerValue::choice("B")),
        Question::new(
            QuestionId::new(2),
            QuestionKind::MultipleChoice,
            "Select every prime number.",
            options(&[("A", "2"), ("B", "4"), ("C", "7"), ("D", "9")]),
            2,
        )?
        .with_correct_answer(AnswerValue::choices(["A", "C"])),
        Question::new(
            QuestionId::new(3),
            QuestionKind::TrueFalse,
            "Water boils at 100 degrees Celsius at sea level.",
            options(&[("T", "True"), ("F", "False")]),
            1,
        )?
        .with_correct_answer(AnswerValue::choice("T")),
        Question::new(
            QuestionId::new(4),
            QuestionKind::ShortAnswer,
            "Name the largest ocean on Earth.",
            Vec::new(),
            1,
        )?
        .with_correct_answer(AnswerValue::text("Pacific")),
        Question::new(
            QuestionId::new(5),
            QuestionKind::Essay,
            "Describe one cause of ocean tides.",
            Vec::new(),
            5,
        )?,
    ])
}

/// Upsert the demo exam and its questions. Safe to run repeatedly.
///
/// # Errors
///
/// Returns `SeedError` if validation or storage fails.
pub async fn seed_demo_exam(
    exams: &dyn ExamRepository,
    exam_id: ExamId,
    title: &str,
    duration_secs: u32,
) -> Result<usize, SeedError> {
    let exam = Exam::new(exam_id, title, duration_secs)?;
    exams.upsert_exam(&exam).await?;

    let questions = demo_questions()?;
    for (position, question) in (0_u32..).zip(&questions) {
        exams.upsert_question(exam_id, position, question).await?;
    }
    Ok(questions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{AttemptRepository, InMemoryRepository, QuestionRepository};
    use exam_core::time::fixed_now;

    #[tokio::test]
    async fn seeding_twice_keeps_one_copy() {
        let repo = InMemoryRepository::new();
        let id = ExamId::new(3);
        assert_eq!(seed_demo_exam(&repo, id, "Demo", 600).await.unwrap(), 5);
        assert_eq!(seed_demo_exam(&repo, id, "Demo v2", 900).await.unwrap(), 5);

        let exam = repo.get_exam(id).await.unwrap();
        assert_eq!(exam.title(), "Demo v2");
        assert_eq!(exam.duration_secs(), 900);

        let started = repo.start_attempt(id, fixed_now()).await.unwrap();
        let questions = repo.fetch_questions(id, started.attempt_id).await.unwrap();
        assert_eq!(questions.len(), 5);
    }
}
