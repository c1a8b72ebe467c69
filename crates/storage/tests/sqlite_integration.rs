use chrono::Duration;
use exam_core::model::{
    AnswerSubmission, AnswerValue, AttemptStatus, Exam, ExamId, Question, QuestionId,
    QuestionKind, QuestionOption,
};
use exam_core::time::fixed_now;
use storage::repository::{
    AnswerBatch, AnswerRepository, AttemptRepository, ExamRepository, QuestionRepository,
    StorageError,
};
use storage::sqlite::{
    LATEST_SCHEMA_VERSION, PoolSettings, SqliteInitError, SqliteRepository,
};

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn choice_question(id: u64) -> Question {
    Question::new(
        QuestionId::new(id),
        QuestionKind::SingleChoice,
        format!("Question {id}"),
        vec![
            QuestionOption::new("A", "first"),
            QuestionOption::new("B", "second"),
        ],
        2,
    )
    .unwrap()
    .with_correct_answer(AnswerValue::choice("B"))
}

async fn seed_exam(repo: &SqliteRepository) -> ExamId {
    let exam = Exam::new(ExamId::new(1), "Geography", 1800).unwrap();
    repo.upsert_exam(&exam).await.unwrap();
    repo.upsert_question(exam.id(), 1, &choice_question(11)).await.unwrap();
    repo.upsert_question(exam.id(), 0, &choice_question(10)).await.unwrap();
    let essay = Question::new(QuestionId::new(12), QuestionKind::Essay, "Explain", Vec::new(), 5)
        .unwrap();
    repo.upsert_question(exam.id(), 2, &essay).await.unwrap();
    exam.id()
}

#[tokio::test]
async fn sqlite_attempt_lifecycle_persists_answers() {
    let repo = connect("memdb_lifecycle").await;
    let exam_id = seed_exam(&repo).await;

    let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();
    assert_eq!(started.exam_title, "Geography");
    assert_eq!(started.ends_at, fixed_now() + Duration::minutes(30));

    let questions = repo.fetch_questions(exam_id, started.attempt_id).await.unwrap();
    let ids: Vec<_> = questions.iter().map(Question::id).collect();
    assert_eq!(
        ids,
        vec![QuestionId::new(10), QuestionId::new(11), QuestionId::new(12)]
    );
    assert!(questions.iter().all(|q| q.correct_answer().is_none()));

    let first = AnswerBatch {
        attempt_id: started.attempt_id,
        answers: vec![
            AnswerSubmission::new(QuestionId::new(10), AnswerValue::choice("A")),
            AnswerSubmission::new(QuestionId::new(12), AnswerValue::text("Rivers")),
        ],
    };
    repo.submit_answers_batch(exam_id, &first).await.unwrap();

    let second = AnswerBatch {
        attempt_id: started.attempt_id,
        answers: vec![
            AnswerSubmission::new(QuestionId::new(10), AnswerValue::choice("B")),
            AnswerSubmission::new(QuestionId::new(12), AnswerValue::text("")),
        ],
    };
    repo.submit_answers_batch(exam_id, &second).await.unwrap();

    let saved = repo.saved_answers(started.attempt_id).await.unwrap();
    assert_eq!(saved, second.answers);
    let progress = repo.fetch_progress(exam_id, started.attempt_id).await.unwrap();
    assert_eq!(progress.answered_count, 1);

    repo.finish_attempt(exam_id, started.attempt_id, fixed_now() + Duration::minutes(3))
        .await
        .unwrap();
    let record = repo.get_attempt(exam_id, started.attempt_id).await.unwrap();
    assert_eq!(record.status, AttemptStatus::Submitted);
    assert_eq!(record.finished_at, Some(fixed_now() + Duration::minutes(3)));

    // finishing twice is harmless
    repo.finish_attempt(exam_id, started.attempt_id, fixed_now() + Duration::hours(1))
        .await
        .unwrap();
    let record = repo.get_attempt(exam_id, started.attempt_id).await.unwrap();
    assert_eq!(record.status, AttemptStatus::Submitted);

    let err = repo.submit_answers_batch(exam_id, &first).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let review = repo.review_questions(exam_id, started.attempt_id).await.unwrap();
    assert_eq!(review[0].correct_answer(), Some(&AnswerValue::choice("B")));
}

#[tokio::test]
async fn sqlite_finish_after_deadline_marks_expired() {
    let repo = connect("memdb_expired").await;
    let exam_id = seed_exam(&repo).await;
    let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();

    repo.finish_attempt(exam_id, started.attempt_id, started.ends_at)
        .await
        .unwrap();

    let record = repo.get_attempt(exam_id, started.attempt_id).await.unwrap();
    assert_eq!(record.status, AttemptStatus::Expired);
}

#[tokio::test]
async fn sqlite_rejects_unknown_exam_and_foreign_attempt() {
    let repo = connect("memdb_missing").await;
    let exam_id = seed_exam(&repo).await;

    let err = repo.start_attempt(ExamId::new(404), fixed_now()).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    let err = repo
        .upsert_question(ExamId::new(404), 0, &choice_question(1))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    let started = repo.start_attempt(exam_id, fixed_now()).await.unwrap();
    let err = repo
        .fetch_questions(ExamId::new(2), started.attempt_id)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_migrate_reports_version_and_is_repeatable() {
    let url = "sqlite:file:memdb_migrate?mode=memory&cache=shared";
    let repo = SqliteRepository::connect_with(
        url,
        PoolSettings {
            max_connections: 1,
            ..PoolSettings::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(repo.migrate().await.unwrap(), LATEST_SCHEMA_VERSION);
    assert_eq!(repo.migrate().await.unwrap(), LATEST_SCHEMA_VERSION);
}

#[tokio::test]
async fn sqlite_refuses_a_newer_schema() {
    let url = "sqlite:file:memdb_newer?mode=memory&cache=shared";
    let repo = connect("memdb_newer").await;

    let pool = sqlx::SqlitePool::connect(url).await.unwrap();
    sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
        .bind(LATEST_SCHEMA_VERSION + 1)
        .bind(fixed_now())
        .execute(&pool)
        .await
        .unwrap();

    let err = repo.migrate().await.unwrap_err();
    assert!(matches!(
        err,
        SqliteInitError::UnsupportedSchema { found, supported }
            if found == LATEST_SCHEMA_VERSION + 1 && supported == LATEST_SCHEMA_VERSION
    ));
}
