use std::sync::{Arc, Mutex};
use std::time::Duration;

use exam_core::model::{AttemptId, ExamId};
use storage::repository::{AnswerBatch, AnswerRepository};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

use super::controller::SessionController;
use super::lock;
use super::view::{SaveStatus, SessionEvent};
use crate::Clock;

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Saved { count: usize },
    /// Nothing was dirty; no request was made.
    Clean,
    /// Another flush held the gate; this tick was skipped.
    Busy,
    /// The request failed. Entries stay dirty for the next tick.
    Failed,
}

#[derive(Debug, Default)]
struct SaveHealth {
    last_saved_at: Option<chrono::DateTime<chrono::Utc>>,
    consecutive_failures: u32,
}

/// Periodically pushes dirty answers to storage.
///
/// At most one flush is in flight per session. A cadence tick that finds the
/// gate held is skipped rather than queued; the final flush before
/// submission waits for it instead.
pub struct AutoSaveScheduler {
    exam_id: ExamId,
    attempt_id: AttemptId,
    controller: Arc<Mutex<SessionController>>,
    answers: Arc<dyn AnswerRepository>,
    clock: Clock,
    period: Duration,
    gate: tokio::sync::Mutex<()>,
    health: Mutex<SaveHealth>,
    cadence: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl AutoSaveScheduler {
    #[must_use]
    pub fn new(
        exam_id: ExamId,
        attempt_id: AttemptId,
        controller: Arc<Mutex<SessionController>>,
        answers: Arc<dyn AnswerRepository>,
        clock: Clock,
        period: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            exam_id,
            attempt_id,
            controller,
            answers,
            clock,
            period,
            gate: tokio::sync::Mutex::new(()),
            health: Mutex::new(SaveHealth::default()),
            cadence: Mutex::new(None),
            events,
        })
    }

    /// Start the cadence task. Returns `false` if it is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut cadence = lock(&self.cadence);
        if cadence.is_some() {
            return false;
        }

        let weak = Arc::downgrade(self);
        let period = self.period;
        *cadence = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                scheduler.flush().await;
            }
        }));
        debug!(attempt_id = %self.attempt_id, period_secs = period.as_secs(), "autosave started");
        true
    }

    /// Cancel the cadence task. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.cadence).take() {
            handle.abort();
            debug!(attempt_id = %self.attempt_id, "autosave stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.cadence).is_some()
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    #[must_use]
    pub fn status(&self) -> SaveStatus {
        let pending = lock(&self.controller).dirty_count();
        let health = lock(&self.health);
        SaveStatus {
            last_saved_at: health.last_saved_at,
            consecutive_failures: health.consecutive_failures,
            pending,
            in_flight: self.is_flushing(),
        }
    }

    /// Flush unless another flush is already in flight.
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_guard) = self.gate.try_lock() else {
            debug!(attempt_id = %self.attempt_id, "autosave tick skipped; flush in flight");
            return FlushOutcome::Busy;
        };
        self.flush_locked().await
    }

    /// Wait for any in-flight flush, then flush whatever is still dirty.
    pub async fn flush_final(&self) -> FlushOutcome {
        let _guard = self.gate.lock().await;
        self.flush_locked().await
    }

    async fn flush_locked(&self) -> FlushOutcome {
        let answers = lock(&self.controller).dirty_snapshot();
        if answers.is_empty() {
            return FlushOutcome::Clean;
        }
        let count = answers.len();
        let batch = AnswerBatch {
            attempt_id: self.attempt_id,
            answers,
        };

        match self.answers.submit_answers_batch(self.exam_id, &batch).await {
            Ok(()) => {
                lock(&self.controller).mark_persisted(&batch.answers);
                let at = self.clock.now();
                {
                    let mut health = lock(&self.health);
                    health.last_saved_at = Some(at);
                    health.consecutive_failures = 0;
                }
                debug!(attempt_id = %self.attempt_id, count, "answers saved");
                let _ = self.events.send(SessionEvent::Saved { count, at });
                FlushOutcome::Saved { count }
            }
            Err(err) => {
                let consecutive_failures = {
                    let mut health = lock(&self.health);
                    health.consecutive_failures += 1;
                    health.consecutive_failures
                };
                warn!(
                    attempt_id = %self.attempt_id,
                    count,
                    consecutive_failures,
                    error = %err,
                    "autosave failed; answers stay dirty"
                );
                let _ = self.events.send(SessionEvent::SaveFailed {
                    count,
                    consecutive_failures,
                });
                FlushOutcome::Failed
            }
        }
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use exam_core::model::{
        AnswerSubmission, AnswerValue, Attempt, Question, QuestionId, QuestionKind,
    };
    use exam_core::time::fixed_now;
    use storage::repository::StorageError;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeAnswers {
        batches: Mutex<Vec<Vec<AnswerSubmission>>>,
        hold: Option<Semaphore>,
        fail: AtomicBool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeAnswers {
        fn holding() -> Self {
            Self {
                hold: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AnswerRepository for FakeAnswers {
        async fn submit_answers_batch(
            &self,
            _exam_id: ExamId,
            batch: &AnswerBatch,
        ) -> Result<(), StorageError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.batches.lock().unwrap().push(batch.answers.clone());
            if let Some(hold) = &self.hold {
                hold.acquire().await.unwrap().forget();
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Connection("offline".into()));
            }
            Ok(())
        }

        async fn saved_answers(
            &self,
            _attempt_id: AttemptId,
        ) -> Result<Vec<AnswerSubmission>, StorageError> {
            Ok(Vec::new())
        }
    }

    fn q(id: u64) -> QuestionId {
        QuestionId::new(id)
    }

    fn setup(answers: Arc<FakeAnswers>) -> (Arc<Mutex<SessionController>>, Arc<AutoSaveScheduler>) {
        let attempt = Attempt::new(
            AttemptId::new(7),
            ExamId::new(1),
            "Quiz",
            fixed_now(),
            fixed_now() + ChronoDuration::minutes(30),
        )
        .unwrap();
        let questions = (1..=3)
            .map(|id| {
                Question::new(q(id), QuestionKind::ShortAnswer, "Q", Vec::new(), 1).unwrap()
            })
            .collect();
        let controller = Arc::new(Mutex::new(SessionController::new(attempt, questions)));
        let (events, _) = broadcast::channel(16);
        let scheduler = AutoSaveScheduler::new(
            ExamId::new(1),
            AttemptId::new(7),
            Arc::clone(&controller),
            answers,
            Clock::manual(fixed_now()),
            Duration::from_secs(30),
            events,
        );
        (controller, scheduler)
    }

    fn answer(controller: &Mutex<SessionController>, id: u64, text: &str) {
        assert!(controller.lock().unwrap().set_answer(q(id), AnswerValue::text(text)));
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn flush_sends_only_latest_values() {
        let fake = Arc::new(FakeAnswers::default());
        let (controller, scheduler) = setup(Arc::clone(&fake));
        answer(&controller, 1, "A");
        answer(&controller, 1, "B");

        assert_eq!(scheduler.flush().await, FlushOutcome::Saved { count: 1 });
        assert_eq!(
            fake.batches.lock().unwrap()[0],
            vec![AnswerSubmission::new(q(1), AnswerValue::text("B"))]
        );

        // nothing dirty, nothing sent
        assert_eq!(scheduler.flush().await, FlushOutcome::Clean);
        assert_eq!(fake.calls(), 1);
        assert_eq!(scheduler.status().last_saved_at, Some(fixed_now()));
    }

    #[tokio::test]
    async fn overlapping_flush_is_skipped_and_mid_flight_edit_survives() {
        let fake = Arc::new(FakeAnswers::holding());
        let (controller, scheduler) = setup(Arc::clone(&fake));
        answer(&controller, 1, "a");
        answer(&controller, 2, "b");

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.flush().await })
        };
        while fake.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.status().in_flight);

        answer(&controller, 3, "c");
        assert_eq!(scheduler.flush().await, FlushOutcome::Busy);

        fake.hold.as_ref().unwrap().add_permits(1);
        assert_eq!(first.await.unwrap(), FlushOutcome::Saved { count: 2 });

        fake.hold.as_ref().unwrap().add_permits(1);
        assert_eq!(scheduler.flush().await, FlushOutcome::Saved { count: 1 });
        assert_eq!(
            fake.batches.lock().unwrap()[1],
            vec![AnswerSubmission::new(q(3), AnswerValue::text("c"))]
        );
        assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.status().pending, 0);
    }

    #[tokio::test]
    async fn failed_flush_keeps_answers_dirty() {
        let fake = Arc::new(FakeAnswers::default());
        fake.fail.store(true, Ordering::SeqCst);
        let (controller, scheduler) = setup(Arc::clone(&fake));
        answer(&controller, 2, "draft");

        assert_eq!(scheduler.flush().await, FlushOutcome::Failed);
        assert_eq!(scheduler.flush().await, FlushOutcome::Failed);
        let status = scheduler.status();
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.pending, 1);
        assert_eq!(status.last_saved_at, None);

        fake.fail.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.flush().await, FlushOutcome::Saved { count: 1 });
        assert_eq!(scheduler.status().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_flushes_dirty_answers_once_per_period() {
        let fake = Arc::new(FakeAnswers::default());
        let (controller, scheduler) = setup(Arc::clone(&fake));
        assert!(scheduler.start());
        assert!(!scheduler.start());

        answer(&controller, 1, "x");
        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        assert_eq!(fake.calls(), 1);

        // clean ticks make no requests
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(fake.calls(), 1);

        scheduler.stop();
        assert!(!scheduler.is_running());
        answer(&controller, 2, "y");
        tokio::time::sleep(Duration::from_secs(90)).await;
        settle().await;
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn final_flush_waits_for_in_flight_flush() {
        let fake = Arc::new(FakeAnswers::holding());
        let (controller, scheduler) = setup(Arc::clone(&fake));
        answer(&controller, 1, "a");

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.flush().await })
        };
        while fake.calls() == 0 {
            tokio::task::yield_now().await;
        }
        answer(&controller, 2, "b");

        let last = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.flush_final().await })
        };
        settle().await;
        assert_eq!(fake.calls(), 1);

        fake.hold.as_ref().unwrap().add_permits(2);
        assert_eq!(first.await.unwrap(), FlushOutcome::Saved { count: 1 });
        assert_eq!(last.await.unwrap(), FlushOutcome::Saved { count: 1 });
        assert_eq!(fake.calls(), 2);
        assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
