use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::answer::AnswerValue;
use crate::model::ids::QuestionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question content cannot be empty")]
    EmptyContent,

    #[error("{kind} question needs at least two options")]
    MissingOptions { kind: QuestionKind },

    #[error("duplicate option key: {key}")]
    DuplicateOptionKey { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Essay,
}

impl QuestionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleChoice => "single_choice",
            Self::MultipleChoice => "multiple_choice",
            Self::TrueFalse => "true_false",
            Self::ShortAnswer => "short_answer",
            Self::Essay => "essay",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "single_choice" => Some(Self::SingleChoice),
            "multiple_choice" => Some(Self::MultipleChoice),
            "true_false" => Some(Self::TrueFalse),
            "short_answer" => Some(Self::ShortAnswer),
            "essay" => Some(Self::Essay),
            _ => None,
        }
    }

    /// Kinds answered by picking option keys.
    #[must_use]
    pub fn has_options(self) -> bool {
        matches!(
            self,
            Self::SingleChoice | Self::MultipleChoice | Self::TrueFalse
        )
    }
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub key: String,
    pub text: String,
}

impl QuestionOption {
    #[must_use]
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
        }
    }
}

/// Read-only projection of an exam question.
///
/// `correct_answer` is only populated in post-submission review; sessions hold redacted copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    kind: QuestionKind,
    content: String,
    options: Vec<QuestionOption>,
    points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correct_answer: Option<AnswerValue>,
}

impl Question {
    /// Build a validated question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` for empty content, missing options on choice kinds,
    /// or repeated option keys.
    pub fn new(
        id: QuestionId,
        kind: QuestionKind,
        content: impl Into<String>,
        options: Vec<QuestionOption>,
        points: u32,
    ) -> Result<Self, QuestionError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(QuestionError::EmptyContent);
        }
        if kind.has_options() && options.len() < 2 {
            return Err(QuestionError::MissingOptions { kind });
        }
        for (idx, option) in options.iter().enumerate() {
            if options[..idx].iter().any(|prev| prev.key == option.key) {
                return Err(QuestionError::DuplicateOptionKey {
                    key: option.key.clone(),
                });
            }
        }

        Ok(Self {
            id,
            kind,
            content,
            options,
            points,
            correct_answer: None,
        })
    }

    #[must_use]
    pub fn with_correct_answer(mut self, answer: AnswerValue) -> Self {
        self.correct_answer = Some(answer);
        self
    }

    /// Copy without the correct answer, safe to hold during an in-progress attempt.
    #[must_use]
    pub fn redacted(mut self) -> Self {
        self.correct_answer = None;
        self
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn options(&self) -> &[QuestionOption] {
        &self.options
    }

    #[must_use]
    pub fn points(&self) -> u32 {
        self.points
    }

    #[must_use]
    pub fn correct_answer(&self) -> Option<&AnswerValue> {
        self.correct_answer.as_ref()
    }
}
