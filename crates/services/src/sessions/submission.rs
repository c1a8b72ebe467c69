use std::sync::{Arc, Mutex};

use exam_core::model::{AttemptId, AttemptStatus, ExamId};
use serde::Serialize;
use storage::repository::AttemptRepository;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::autosave::{AutoSaveScheduler, FlushOutcome};
use super::controller::SessionController;
use super::lock;
use super::view::SessionEvent;
use crate::Clock;
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    NotSubmitted,
    Submitting,
    Submitted,
    Failed,
}

/// What asked for the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    /// The user confirmed submission.
    Manual,
    /// The countdown reached zero.
    Expired,
}

impl SubmitTrigger {
    #[must_use]
    pub fn final_status(self) -> AttemptStatus {
        match self {
            Self::Manual => AttemptStatus::Submitted,
            Self::Expired => AttemptStatus::Expired,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    /// Another caller is already submitting; nothing was done.
    AlreadyInProgress,
    /// The attempt is already final; nothing was done.
    AlreadySubmitted,
}

/// Summary shown to the user before a manual submission.
///
/// Can only be obtained from the session, so a manual submit always passes
/// through the confirmation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitConfirmation {
    pub answered: usize,
    pub unanswered: usize,
    pub marked_for_review: usize,
    pub remaining: String,
    _issued: (),
}

impl SubmitConfirmation {
    pub(crate) fn new(
        answered: usize,
        unanswered: usize,
        marked_for_review: usize,
        remaining: String,
    ) -> Self {
        Self {
            answered,
            unanswered,
            marked_for_review,
            remaining,
            _issued: (),
        }
    }
}

#[derive(Debug)]
struct Progress {
    state: SubmissionState,
    trigger: Option<SubmitTrigger>,
    /// Set once the countdown has asked for submission, even if it found a
    /// manual submission already underway.
    expiry_requested: bool,
}

/// Finalizes an attempt exactly once.
///
/// Entry is guarded by a state check so concurrent triggers (a manual submit
/// racing the timer) make a single `finish_attempt` call. The final flush is
/// best effort: a failed flush is logged and finalization continues.
///
/// A failure past the deadline, or after expiry was requested, keeps answers
/// closed and records `Expired` as the trigger to retry with. Dropping a
/// `submit` future midway counts as a failure.
pub struct SubmissionProtocol {
    exam_id: ExamId,
    attempt_id: AttemptId,
    controller: Arc<Mutex<SessionController>>,
    autosave: Arc<AutoSaveScheduler>,
    attempts: Arc<dyn AttemptRepository>,
    clock: Clock,
    progress: Mutex<Progress>,
    events: broadcast::Sender<SessionEvent>,
}

impl SubmissionProtocol {
    #[must_use]
    pub fn new(
        exam_id: ExamId,
        attempt_id: AttemptId,
        controller: Arc<Mutex<SessionController>>,
        autosave: Arc<AutoSaveScheduler>,
        attempts: Arc<dyn AttemptRepository>,
        clock: Clock,
        events: broadcast::Sender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            exam_id,
            attempt_id,
            controller,
            autosave,
            attempts,
            clock,
            progress: Mutex::new(Progress {
                state: SubmissionState::NotSubmitted,
                trigger: None,
                expiry_requested: false,
            }),
            events,
        })
    }

    #[must_use]
    pub fn state(&self) -> SubmissionState {
        lock(&self.progress).state
    }

    /// The trigger a retry would use, if the last submission failed.
    #[must_use]
    pub fn pending_trigger(&self) -> Option<SubmitTrigger> {
        let progress = lock(&self.progress);
        match progress.state {
            SubmissionState::Failed => progress.trigger,
            _ => None,
        }
    }

    /// Flush, then finish the attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Finish` if storage rejects the finish call. The
    /// state moves to `Failed` and a later call retries.
    pub async fn submit(&self, trigger: SubmitTrigger) -> Result<SubmitOutcome, SessionError> {
        let trigger = {
            let mut progress = lock(&self.progress);
            if trigger == SubmitTrigger::Expired {
                progress.expiry_requested = true;
            }
            match progress.state {
                SubmissionState::Submitting => return Ok(SubmitOutcome::AlreadyInProgress),
                SubmissionState::Submitted => return Ok(SubmitOutcome::AlreadySubmitted),
                SubmissionState::NotSubmitted | SubmissionState::Failed => {
                    let trigger = if progress.expiry_requested {
                        SubmitTrigger::Expired
                    } else {
                        trigger
                    };
                    progress.state = SubmissionState::Submitting;
                    progress.trigger = Some(trigger);
                    trigger
                }
            }
        };
        lock(&self.controller).begin_finalization();
        let mut in_flight = InFlight {
            protocol: self,
            trigger,
            armed: true,
        };
        info!(attempt_id = %self.attempt_id, ?trigger, "submitting attempt");

        if self.autosave.flush_final().await == FlushOutcome::Failed {
            warn!(attempt_id = %self.attempt_id, "final flush failed; finishing anyway");
        }

        let finished_at = self.clock.now();
        let result = self
            .attempts
            .finish_attempt(self.exam_id, self.attempt_id, finished_at)
            .await;
        in_flight.armed = false;
        match result {
            Ok(()) => {
                let status = trigger.final_status();
                if let Err(err) = lock(&self.controller).finalize(status) {
                    debug!(attempt_id = %self.attempt_id, error = %err, "attempt already final locally");
                }
                lock(&self.progress).state = SubmissionState::Submitted;
                self.autosave.stop();
                info!(attempt_id = %self.attempt_id, status = %status, "attempt finalized");
                let _ = self.events.send(SessionEvent::Submitted { status });
                Ok(SubmitOutcome::Submitted)
            }
            Err(err) => {
                warn!(attempt_id = %self.attempt_id, error = %err, "finishing attempt failed");
                self.mark_failed(trigger, err.to_string());
                Err(SessionError::Finish(err))
            }
        }
    }

    /// Retry a failed submission with the trigger recorded for it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotRetryable` unless the last attempt failed,
    /// or the error from [`SubmissionProtocol::submit`].
    pub async fn retry(&self) -> Result<SubmitOutcome, SessionError> {
        let Some(trigger) = self.pending_trigger() else {
            return Err(SessionError::NotRetryable);
        };
        self.submit(trigger).await
    }

    /// Leave `Submitting` after an unsuccessful run. Answers reopen only for
    /// a manual submission that is still before the deadline.
    fn mark_failed(&self, trigger: SubmitTrigger, reason: String) {
        let now = self.clock.now();
        let trigger = {
            let mut progress = lock(&self.progress);
            let mut controller = lock(&self.controller);
            let expired = trigger == SubmitTrigger::Expired
                || progress.expiry_requested
                || now >= controller.attempt().ends_at();
            let trigger = if expired {
                progress.expiry_requested = true;
                SubmitTrigger::Expired
            } else {
                controller.abort_finalization();
                SubmitTrigger::Manual
            };
            progress.state = SubmissionState::Failed;
            progress.trigger = Some(trigger);
            trigger
        };
        debug!(attempt_id = %self.attempt_id, ?trigger, "submission marked failed");
        let _ = self.events.send(SessionEvent::SubmitFailed { reason });
    }
}

/// Resets an interrupted submission when its future is dropped before the
/// finish call returns.
struct InFlight<'a> {
    protocol: &'a SubmissionProtocol,
    trigger: SubmitTrigger,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(attempt_id = %self.protocol.attempt_id, "submission cancelled before finishing");
            self.protocol
                .mark_failed(self.trigger, "submission was cancelled".to_owned());
        }
    }
}
