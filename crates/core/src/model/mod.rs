mod answer;
mod attempt;
mod exam;
mod ids;
mod question;
mod settings;
mod violation;

pub use ids::{AttemptId, ExamId, ParseIdError, QuestionId};

pub use answer::{AnswerEntry, AnswerSubmission, AnswerValue};
pub use attempt::{Attempt, AttemptError, AttemptStatus};
pub use exam::{Exam, ExamError};
pub use question::{Question, QuestionError, QuestionKind, QuestionOption};
pub use settings::{SessionSettings, SettingsError};
pub use violation::{
    EnvironmentSignal, KeyCombo, KeyComboParseError, Violation, ViolationKind,
};
