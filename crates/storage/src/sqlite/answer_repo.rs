use chrono::Utc;
use exam_core::model::{AnswerSubmission, AnswerValue, AttemptId, AttemptStatus, ExamId};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{conn, from_json, id_i64, parse_status, question_id_from_i64, ser, to_json},
};
use crate::repository::{AnswerBatch, AnswerRepository, StorageError};

#[async_trait::async_trait]
impl AnswerRepository for SqliteRepository {
    async fn submit_answers_batch(
        &self,
        exam_id: ExamId,
        batch: &AnswerBatch,
    ) -> Result<(), StorageError> {
        let attempt = id_i64("attempt_id", batch.attempt_id.value())?;
        let exam = id_i64("exam_id", exam_id.value())?;
        let saved_at = Utc::now();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let row = sqlx::query("SELECT status FROM attempts WHERE id = ?1 AND exam_id = ?2")
            .bind(attempt)
            .bind(exam)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        if parse_status(&row.try_get::<String, _>("status").map_err(ser)?)?
            != AttemptStatus::InProgress
        {
            return Err(StorageError::Conflict);
        }

        for answer in &batch.answers {
            sqlx::query(
                r"
                    INSERT INTO attempt_answers (
                        attempt_id, exam_id, question_id, value, answered, saved_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(attempt_id, question_id) DO UPDATE SET
                        value = excluded.value,
                        answered = excluded.answered,
                        saved_at = excluded.saved_at
                ",
            )
            .bind(attempt)
            .bind(exam)
            .bind(id_i64("question_id", answer.question_id.value())?)
            .bind(to_json(&answer.value)?)
            .bind(i64::from(!answer.value.is_blank()))
            .bind(saved_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn saved_answers(
        &self,
        attempt_id: AttemptId,
    ) -> Result<Vec<AnswerSubmission>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT question_id, value
                FROM attempt_answers
                WHERE attempt_id = ?1
                ORDER BY question_id ASC
            ",
        )
        .bind(id_i64("attempt_id", attempt_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let question_id =
                question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?)?;
            let value: AnswerValue =
                from_json("value", &row.try_get::<String, _>("value").map_err(ser)?)?;
            out.push(AnswerSubmission::new(question_id, value));
        }
        Ok(out)
    }
}
