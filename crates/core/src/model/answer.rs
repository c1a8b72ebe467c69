use serde::{Deserialize, Serialize};

use crate::model::ids::QuestionId;

/// A user's answer to a single question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    /// One option key (single choice, true/false).
    Choice(String),
    /// Several option keys (multiple choice), kept sorted and deduplicated.
    Choices(Vec<String>),
    /// Free text (short answer, essay).
    Text(String),
}

impl AnswerValue {
    #[must_use]
    pub fn choice(key: impl Into<String>) -> Self {
        Self::Choice(key.into())
    }

    /// Build a multiple-choice answer; keys are normalized so equal selections compare equal.
    #[must_use]
    pub fn choices<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();
        Self::Choices(keys)
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// True for a deliberately cleared answer.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Choice(key) => key.trim().is_empty(),
            Self::Choices(keys) => keys.is_empty(),
            Self::Text(text) => text.trim().is_empty(),
        }
    }
}

/// Local state for one answered question.
///
/// The entry is dirty while `value` differs from the last value confirmed persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEntry {
    value: AnswerValue,
    persisted: Option<AnswerValue>,
}

impl AnswerEntry {
    #[must_use]
    pub fn new(value: AnswerValue) -> Self {
        Self {
            value,
            persisted: None,
        }
    }

    #[must_use]
    pub fn value(&self) -> &AnswerValue {
        &self.value
    }

    #[must_use]
    pub fn persisted(&self) -> Option<&AnswerValue> {
        self.persisted.as_ref()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.persisted.as_ref() != Some(&self.value)
    }

    pub fn set(&mut self, value: AnswerValue) {
        self.value = value;
    }

    /// Record that `value` reached storage. Has no effect on dirtiness if the entry
    /// was overwritten after `value` was captured.
    pub fn mark_persisted(&mut self, value: &AnswerValue) {
        self.persisted = Some(value.clone());
    }
}

/// One entry of an answer batch sent to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

impl AnswerSubmission {
    #[must_use]
    pub fn new(question_id: QuestionId, value: AnswerValue) -> Self {
        Self { question_id, value }
    }
}
