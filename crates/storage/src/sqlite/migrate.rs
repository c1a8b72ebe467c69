use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Newest schema version this build knows how to create.
pub const LATEST_SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS exams (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            duration_secs INTEGER NOT NULL CHECK (duration_secs > 0)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS questions (
            exam_id INTEGER NOT NULL,
            id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            options TEXT NOT NULL,
            points INTEGER NOT NULL CHECK (points >= 0),
            correct_answer TEXT,
            PRIMARY KEY (exam_id, id),
            FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exam_id INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('in_progress', 'submitted', 'expired')),
            finished_at TEXT,
            FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS attempt_answers (
            attempt_id INTEGER NOT NULL,
            exam_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            value TEXT NOT NULL,
            answered INTEGER NOT NULL CHECK (answered IN (0, 1)),
            saved_at TEXT NOT NULL,
            PRIMARY KEY (attempt_id, question_id),
            FOREIGN KEY (attempt_id) REFERENCES attempts(id) ON DELETE CASCADE,
            FOREIGN KEY (exam_id, question_id) REFERENCES questions(exam_id, id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_questions_exam_position
            ON questions(exam_id, position, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_attempts_exam_status
            ON attempts(exam_id, status);
    ",
];

/// Runs pending schema migrations inside one transaction per version and
/// returns the resulting version.
pub async fn run_migrations(pool: &SqlitePool) -> Result<i64, SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    let found = current_version(pool).await?;
    if found > LATEST_SCHEMA_VERSION {
        return Err(SqliteInitError::UnsupportedSchema {
            found,
            supported: LATEST_SCHEMA_VERSION,
        });
    }

    // Version 1: exams, questions, attempts and saved answers.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(current_version(pool).await?)
}

async fn current_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}
