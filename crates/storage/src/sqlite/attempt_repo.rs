use chrono::{DateTime, Utc};
use exam_core::model::{AttemptId, AttemptStatus, ExamId};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{attempt_id_from_i64, conn, id_i64, map_attempt_row, ser},
};
use crate::repository::{
    AttemptProgress, AttemptRecord, AttemptRepository, ExamRepository, StartedAttempt,
    StorageError,
};

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn start_attempt(
        &self,
        exam_id: ExamId,
        started_at: DateTime<Utc>,
    ) -> Result<StartedAttempt, StorageError> {
        let exam = self.get_exam(exam_id).await?;
        let ends_at = started_at + exam.duration();

        let res = sqlx::query(
            r"
                INSERT INTO attempts (exam_id, started_at, ends_at, status)
                VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(id_i64("exam_id", exam_id.value())?)
        .bind(started_at)
        .bind(ends_at)
        .bind(AttemptStatus::InProgress.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(StartedAttempt {
            attempt_id: attempt_id_from_i64(res.last_insert_rowid())?,
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
        let row = sqlx::query(
            r"
                SELECT id, exam_id, started_at, ends_at, status, finished_at
                FROM attempts
                WHERE id = ?1 AND exam_id = ?2
            ",
        )
        .bind(id_i64("attempt_id", attempt_id.value())?)
        .bind(id_i64("exam_id", exam_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        map_attempt_row(&row)
    }

    async fn fetch_progress(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
    ) -> Result<AttemptProgress, StorageError> {
        self.get_attempt(exam_id, attempt_id).await?;
        let row = sqlx::query(
            r"
                SELECT COUNT(*) AS answered
                FROM attempt_answers
                WHERE attempt_id = ?1 AND answered = 1
            ",
        )
        .bind(id_i64("attempt_id", attempt_id.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;

        Ok(AttemptProgress {
            answered_count: u32_from_i64(
                "answered",
                row.try_get::<i64, _>("answered").map_err(ser)?,
            )?,
        })
    }

    async fn finish_attempt(
        &self,
        exam_id: ExamId,
        attempt_id: AttemptId,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let record = self.get_attempt(exam_id, attempt_id).await?;
        if record.status != AttemptStatus::InProgress {
            return Ok(());
        }
        let status = if finished_at >= record.ends_at {
            AttemptStatus::Expired
        } else {
            AttemptStatus::Submitted
        };

        sqlx::query(
            r"
                UPDATE attempts
                SET status = ?1, finished_at = ?2
                WHERE id = ?3 AND status = 'in_progress'
            ",
        )
        .bind(status.as_str())
        .bind(finished_at)
        .bind(id_i64("attempt_id", attempt_id.value())?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}
