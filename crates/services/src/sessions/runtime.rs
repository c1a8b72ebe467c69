use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use exam_core::model::{
    AnswerValue, Attempt, AttemptId, AttemptStatus, EnvironmentSignal, ExamId, Question,
    QuestionId, SessionSettings, Violation,
};
use exam_core::timer::{CountdownTimer, TimerEvent, TimerPhase, format_countdown};
use storage::repository::{AnswerRepository, AttemptRepository};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::autosave::AutoSaveScheduler;
use super::controller::SessionController;
use super::integrity::{EnvironmentBus, IntegrityMonitor};
use super::lock;
use super::submission::{
    SubmissionProtocol, SubmissionState, SubmitConfirmation, SubmitOutcome, SubmitTrigger,
};
use super::view::{SaveStatus, SessionEvent, SessionView};
use crate::Clock;
use crate::error::SessionError;

const EVENT_CAPACITY: usize = 64;

/// Storage seams a running session writes through.
#[derive(Clone)]
pub struct SessionDeps {
    pub clock: Clock,
    pub attempts: Arc<dyn AttemptRepository>,
    pub answers: Arc<dyn AnswerRepository>,
}

struct SessionCore {
    exam_id: ExamId,
    attempt_id: AttemptId,
    clock: Clock,
    controller: Arc<Mutex<SessionController>>,
    timer: Mutex<CountdownTimer>,
    autosave: Arc<AutoSaveScheduler>,
    integrity: Arc<IntegrityMonitor>,
    submission: Arc<SubmissionProtocol>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionCore {
    fn poll_timer(&self) -> Option<TimerEvent> {
        let now = self.clock.now();
        let event = lock(&self.timer).poll(now)?;
        match event {
            TimerEvent::FirstWarning { remaining } | TimerEvent::FinalWarning { remaining } => {
                let remaining = format_countdown(remaining);
                info!(attempt_id = %self.attempt_id, phase = ?event.phase(), %remaining, "time warning");
                let _ = self.events.send(SessionEvent::Warning {
                    phase: event.phase(),
                    remaining,
                });
            }
            TimerEvent::Expired => {
                warn!(attempt_id = %self.attempt_id, "time expired; submitting");
                let _ = self.events.send(SessionEvent::Expired);
            }
        }
        Some(event)
    }
}

#[derive(Default)]
struct Tasks {
    timer: Option<JoinHandle<()>>,
    torn_down: bool,
}

/// One running exam attempt: the controller plus its background machinery
/// (countdown, autosave, integrity listener, submission).
///
/// Dropping the session tears it down. A submission already underway keeps
/// running to completion.
pub struct ExamSession {
    core: Arc<SessionCore>,
    tasks: Mutex<Tasks>,
}

impl ExamSession {
    /// Wire up and start a session for a freshly started attempt.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn launch(
        attempt: Attempt,
        questions: Vec<Question>,
        deps: SessionDeps,
        settings: &SessionSettings,
        bus: &EnvironmentBus,
    ) -> Self {
        let exam_id = attempt.exam_id();
        let attempt_id = attempt.id();
        let timer = CountdownTimer::from_settings(attempt.ends_at(), settings);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let controller = Arc::new(Mutex::new(SessionController::new(attempt, questions)));

        let autosave = AutoSaveScheduler::new(
            exam_id,
            attempt_id,
            Arc::clone(&controller),
            deps.answers,
            deps.clock.clone(),
            settings.autosave_interval(),
            events.clone(),
        );
        let integrity = IntegrityMonitor::new(deps.clock.clone(), settings, events.clone());
        let submission = SubmissionProtocol::new(
            exam_id,
            attempt_id,
            Arc::clone(&controller),
            Arc::clone(&autosave),
            deps.attempts,
            deps.clock.clone(),
            events.clone(),
        );

        let core = Arc::new(SessionCore {
            exam_id,
            attempt_id,
            clock: deps.clock,
            controller,
            timer: Mutex::new(timer),
            autosave,
            integrity,
            submission,
            events,
        });

        core.autosave.start();
        core.integrity.bind(bus);
        let timer = spawn_countdown(&core, settings.poll_interval());
        info!(%exam_id, %attempt_id, "exam session started");

        Self {
            core,
            tasks: Mutex::new(Tasks {
                timer: Some(timer),
                torn_down: false,
            }),
        }
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.core.exam_id
    }

    #[must_use]
    pub fn attempt_id(&self) -> AttemptId {
        self.core.attempt_id
    }

    /// Receive session notifications from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    //
    // ─── USER ACTIONS ──────────────────────────────────────────────────────────
    //

    pub fn set_answer(&self, question_id: QuestionId, value: AnswerValue) -> bool {
        lock(&self.core.controller).set_answer(question_id, value)
    }

    pub fn toggle_review(&self, question_id: QuestionId) -> bool {
        lock(&self.core.controller).toggle_review(question_id)
    }

    pub fn go_to(&self, index: i64) -> usize {
        lock(&self.core.controller).go_to(index)
    }

    pub fn next(&self) -> usize {
        lock(&self.core.controller).next()
    }

    pub fn previous(&self) -> usize {
        lock(&self.core.controller).previous()
    }

    /// Feed a signal straight to the integrity monitor, bypassing the bus.
    pub fn record_signal(&self, signal: &EnvironmentSignal) -> Option<Violation> {
        self.core.integrity.record(signal)
    }

    //
    // ─── READS ─────────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn current_question(&self) -> Option<Question> {
        lock(&self.core.controller).current_question().cloned()
    }

    #[must_use]
    pub fn answers(&self) -> BTreeMap<QuestionId, AnswerValue> {
        lock(&self.core.controller).answers()
    }

    #[must_use]
    pub fn review_marks(&self) -> BTreeSet<QuestionId> {
        lock(&self.core.controller).review_marks().clone()
    }

    #[must_use]
    pub fn status(&self) -> AttemptStatus {
        lock(&self.core.controller).status()
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        lock(&self.core.timer).remaining(self.core.clock.now())
    }

    #[must_use]
    pub fn timer_phase(&self) -> TimerPhase {
        lock(&self.core.timer).phase()
    }

    #[must_use]
    pub fn save_status(&self) -> SaveStatus {
        self.core.autosave.status()
    }

    #[must_use]
    pub fn violation_count(&self) -> usize {
        self.core.integrity.violation_count()
    }

    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.core.integrity.violations()
    }

    #[must_use]
    pub fn submission_state(&self) -> SubmissionState {
        self.core.submission.state()
    }

    /// Snapshot for rendering.
    #[must_use]
    pub fn view(&self) -> SessionView {
        let now = self.core.clock.now();
        let (remaining, timer_phase) = {
            let timer = lock(&self.core.timer);
            (timer.format_remaining(now), timer.phase())
        };
        let save = self.core.autosave.status();
        let submission = self.core.submission.state();
        let controller = lock(&self.core.controller);
        SessionView {
            attempt_id: self.core.attempt_id,
            exam_title: controller.attempt().exam_title().to_owned(),
            status: controller.status(),
            current_index: controller.current_index(),
            total: controller.total(),
            current_question: controller.current_question().cloned(),
            answers: controller.answers(),
            review_marks: controller.review_marks().clone(),
            answered: controller.answered_count(),
            remaining,
            timer_phase,
            save,
            violation_count: self.core.integrity.violation_count(),
            submission,
        }
    }

    //
    // ─── SUBMISSION ────────────────────────────────────────────────────────────
    //

    /// Build the summary the user confirms before a manual submit.
    #[must_use]
    pub fn prepare_submit(&self) -> SubmitConfirmation {
        let remaining = lock(&self.core.timer).format_remaining(self.core.clock.now());
        let controller = lock(&self.core.controller);
        let answered = controller.answered_count();
        SubmitConfirmation::new(
            answered,
            controller.total().saturating_sub(answered),
            controller.review_marks().len(),
            remaining,
        )
    }

    /// Submit after the user confirmed.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Finish` if storage rejects the finish call.
    pub async fn submit_confirmed(
        &self,
        confirmation: SubmitConfirmation,
    ) -> Result<SubmitOutcome, SessionError> {
        info!(
            attempt_id = %self.core.attempt_id,
            answered = confirmation.answered,
            unanswered = confirmation.unanswered,
            "user confirmed submission"
        );
        self.core.submission.submit(SubmitTrigger::Manual).await
    }

    /// Submit directly, without the confirmation step. The countdown uses
    /// this path on expiry; repeated calls are no-ops once submitting.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Finish` if storage rejects the finish call.
    pub async fn submit(&self, trigger: SubmitTrigger) -> Result<SubmitOutcome, SessionError> {
        self.core.submission.submit(trigger).await
    }

    /// Retry after a failed submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotRetryable` unless the last submission failed.
    pub async fn retry_submit(&self) -> Result<SubmitOutcome, SessionError> {
        self.core.submission.retry().await
    }

    //
    // ─── LIFECYCLE ─────────────────────────────────────────────────────────────
    //

    /// Stop the countdown and autosave and release the bus subscription.
    /// Idempotent.
    pub fn teardown(&self) {
        let mut tasks = lock(&self.tasks);
        if tasks.torn_down {
            return;
        }
        tasks.torn_down = true;
        if let Some(timer) = tasks.timer.take() {
            timer.abort();
        }
        self.core.autosave.stop();
        self.core.integrity.unbind();
        info!(attempt_id = %self.core.attempt_id, "exam session torn down");
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        lock(&self.tasks).torn_down
    }
}

impl Drop for ExamSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_countdown(core: &Arc<SessionCore>, period: std::time::Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(core);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(core) = weak.upgrade() else {
                break;
            };
            let state = core.submission.state();
            if state == SubmissionState::Submitted {
                break;
            }
            core.poll_timer();
            // Keeps asking until the attempt is final: a manual submission in
            // flight at the deadline may still fail.
            if state != SubmissionState::Submitting && lock(&core.timer).is_expired() {
                // Detached so teardown cannot cancel a finalization midway.
                let submission = Arc::clone(&core.submission);
                let attempt_id = core.attempt_id;
                tokio::spawn(async move {
                    if let Err(err) = submission.submit(SubmitTrigger::Expired).await {
                        warn!(%attempt_id, error = %err, "expiry submission failed");
                    }
                });
            }
        }
    })
}
