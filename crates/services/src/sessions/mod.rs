mod autosave;
mod controller;
mod integrity;
mod runtime;
mod submission;
mod view;
mod workflow;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use autosave::{AutoSaveScheduler, FlushOutcome};
pub use controller::SessionController;
pub use integrity::{EnvironmentBus, IntegrityMonitor};
pub use runtime::{ExamSession, SessionDeps};
pub use submission::{
    SubmissionProtocol, SubmissionState, SubmitConfirmation, SubmitOutcome, SubmitTrigger,
};
pub use view::{SaveStatus, SessionEvent, SessionView};
pub use workflow::ExamSessionService;

/// Lock, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
