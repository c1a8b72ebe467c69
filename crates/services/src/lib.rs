#![forbid(unsafe_code)]

pub mod error;
pub mod sessions;

pub use exam_core::Clock;
pub use sessions as session;

pub use error::SessionError;

pub use sessions::{
    EnvironmentBus, ExamSession, ExamSessionService, SaveStatus, SessionEvent, SessionView,
    SubmissionState, SubmitConfirmation, SubmitOutcome, SubmitTrigger,
};
