use exam_core::model::{
    AnswerValue, AttemptId, AttemptStatus, ExamId, Question, QuestionId, QuestionKind,
    QuestionOption,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

use crate::repository::{AttemptRecord, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn exam_id_from_i64(v: i64) -> Result<ExamId, StorageError> {
    Ok(ExamId::new(i64_to_u64("exam_id", v)?))
}

pub(crate) fn attempt_id_from_i64(v: i64) -> Result<AttemptId, StorageError> {
    Ok(AttemptId::new(i64_to_u64("attempt_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

pub(crate) fn from_json<T: DeserializeOwned>(
    field: &'static str,
    raw: &str,
) -> Result<T, StorageError> {
    serde_json::from_str(raw)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

pub(crate) fn parse_status(s: &str) -> Result<AttemptStatus, StorageError> {
    AttemptStatus::parse(s)
        .ok_or_else(|| StorageError::Serialization(format!("invalid status: {s}")))
}

pub(crate) fn map_question_row(row: &sqlx::sqlite::SqliteRow) -> Result<Question, StorageError> {
    let kind_str: String = row.try_get("kind").map_err(ser)?;
    let kind = QuestionKind::parse(&kind_str)
        .ok_or_else(|| StorageError::Serialization(format!("invalid kind: {kind_str}")))?;
    let options: Vec<QuestionOption> =
        from_json("options", &row.try_get::<String, _>("options").map_err(ser)?)?;
    let points_i64: i64 = row.try_get("points").map_err(ser)?;
    let points = u32::try_from(points_i64)
        .map_err(|_| StorageError::Serialization(format!("invalid points: {points_i64}")))?;

    let question = Question::new(
        question_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        kind,
        row.try_get::<String, _>("content").map_err(ser)?,
        options,
        points,
    )
    .map_err(ser)?;

    match row.try_get::<Option<String>, _>("correct_answer").map_err(ser)? {
        Some(raw) => Ok(question.with_correct_answer(from_json::<AnswerValue>(
            "correct_answer",
            &raw,
        )?)),
        None => Ok(question),
    }
}

pub(crate) fn map_attempt_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<AttemptRecord, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(AttemptRecord {
        id: attempt_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        exam_id: exam_id_from_i64(row.try_get::<i64, _>("exam_id").map_err(ser)?)?,
        started_at: row.try_get("started_at").map_err(ser)?,
        ends_at: row.try_get("ends_at").map_err(ser)?,
        status: parse_status(&status)?,
        finished_at: row.try_get("finished_at").map_err(ser)?,
    })
}
