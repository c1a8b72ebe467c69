use exam_core::model::{AttemptId, AttemptStatus, Exam, ExamId, Question};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_question_row, parse_status, ser, to_json},
};
use crate::repository::{ExamRepository, QuestionRepository, StorageError};

impl SqliteRepository {
    async fn attempt_status(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptStatus, StorageError> {
        let row = sqlx::query("SELECT status FROM attempts WHERE id = ?1 AND exam_id = ?2")
            .bind(id_i64("attempt_id", attempt_id.value())?)
            .bind(id_i64("exam_id", exam_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        parse_status(&row.try_get::<String, _>("status").map_err(ser)?)
    }

    async fn ordered_questions(&self, exam_id: ExamId) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, kind, content, options, points, correct_answer
                FROM questions
                WHERE exam_id = ?1
                ORDER BY position ASC, id ASC
            ",
        )
        .bind(id_i64("exam_id", exam_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_question_row(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl ExamRepository for SqliteRepository {
    async fn upsert_exam(&self, exam: &Exam) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO exams (id, title, duration_secs)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    duration_secs = excluded.duration_secs
            ",
        )
        .bind(id_i64("exam_id", exam.id().value())?)
        .bind(exam.title())
        .bind(i64::from(exam.duration_secs()))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn get_exam(&self, id: ExamId) -> Result<Exam, StorageError> {
        let row = sqlx::query("SELECT title, duration_secs FROM exams WHERE id = ?1")
            .bind(id_i64("exam_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;

        let duration: i64 = row.try_get("duration_secs").map_err(ser)?;
        let duration = u32::try_from(duration).map_err(|_| {
            StorageError::Serialization(format!("invalid duration_secs: {duration}"))
        })?;
        Exam::new(id, row.try_get::<String, _>("title").map_err(ser)?, duration).map_err(ser)
    }

    async fn upsert_question(
        &self,
        exam_id: ExamId,
        position: u32,
        question: &Question,
    ) -> Result<(), StorageError> {
        let correct = question.correct_answer().map(to_json).transpose()?;
        let res = sqlx::query(
            r"
                INSERT INTO questions (
                    exam_id, id, position, kind, content, options, points, correct_answer
                )
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                WHERE EXISTS (SELECT 1 FROM exams WHERE id = ?1)
                ON CONFLICT(exam_id, id) DO UPDATE SET
                    position = excluded.position,
                    kind = excluded.kind,
                    content = excluded.content,
                    options = excluded.options,
                    points = excluded.points,
                    correct_answer = excluded.correct_answer
            ",
        )
        .bind(id_i64("exam_id", exam_id.value())?)
        .bind(id_i64("question_id", question.id().value())?)
        .bind(i64::from(position))
        .bind(question.kind().as_str())
        .bind(question.content())
        .bind(to_json(&question.options())?)
        .bind(i64::from(question.points()))
        .bind(correct)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn fetch_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, StorageError> {
        self.attempt_status(exam_id, attempt_id).await?;
        let questions = self.ordered_questions(exam_id).await?;
        Ok(questions.into_iter().map(Question::redacted).collect())
    }

    async fn review_questions(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<Vec<Question>, StorageError> {
        if self.attempt_status(exam_id, attempt_id).await? == AttemptStatus::InProgress {
            return Err(StorageError::Conflict);
        }
        self.ordered_questions(exam_id).await
    }
}
