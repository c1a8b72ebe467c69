use std::fmt;

use exam_core::model::{AnswerValue, EnvironmentSignal, KeyCombo, Question, QuestionKind};

/// One line typed into the headless session driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Next,
    Previous,
    /// 1-based question number as typed.
    GoTo(i64),
    Answer(String),
    Clear,
    Mark,
    Signal(EnvironmentSignal),
    Status,
    Submit,
    Confirm,
    Cancel,
    Retry,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    MissingArgument { command: &'static str },
    InvalidNumber(String),
    InvalidKey(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(raw) => write!(f, "unknown command: {raw} (try `help`)"),
            CommandError::MissingArgument { command } => write!(f, "{command} needs an argument"),
            CommandError::InvalidNumber(raw) => write!(f, "not a question number: {raw}"),
            CommandError::InvalidKey(raw) => write!(f, "not a key combination: {raw}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl ConsoleCommand {
    /// Parse a trimmed input line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns `CommandError` for unknown commands or bad arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(head, rest)| (head, rest.trim()));

        let command = match head.to_ascii_lowercase().as_str() {
            "n" | "next" => Self::Next,
            "p" | "prev" | "previous" => Self::Previous,
            "g" | "goto" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument { command: "goto" });
                }
                let number = rest
                    .parse::<i64>()
                    .map_err(|_| CommandError::InvalidNumber(rest.to_owned()))?;
                Self::GoTo(number)
            }
            "a" | "answer" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument { command: "answer" });
                }
                Self::Answer(rest.to_owned())
            }
            "clear" => Self::Clear,
            "m" | "mark" => Self::Mark,
            "hide" => Self::Signal(EnvironmentSignal::VisibilityChanged { hidden: true }),
            "show" => Self::Signal(EnvironmentSignal::VisibilityChanged { hidden: false }),
            "menu" => Self::Signal(EnvironmentSignal::ContextMenu),
            "key" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument { command: "key" });
                }
                let combo = rest
                    .parse::<KeyCombo>()
                    .map_err(|_| CommandError::InvalidKey(rest.to_owned()))?;
                Self::Signal(EnvironmentSignal::KeyCombo(combo))
            }
            "s" | "status" => Self::Status,
            "submit" => Self::Submit,
            "y" | "yes" => Self::Confirm,
            "no" | "cancel" => Self::Cancel,
            "retry" => Self::Retry,
            "h" | "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            _ => return Err(CommandError::Unknown(head.to_owned())),
        };
        Ok(Some(command))
    }
}

/// Interpret typed answer text for the question's kind.
///
/// Choice keys are matched case-insensitively against the question's options;
/// multiple choice accepts a comma or space separated list.
#[must_use]
pub fn answer_for(question: &Question, raw: &str) -> AnswerValue {
    let normalize = |key: &str| {
        question
            .options()
            .iter()
            .find(|option| option.key.eq_ignore_ascii_case(key))
            .map_or_else(|| key.to_owned(), |option| option.key.clone())
    };
    match question.kind() {
        QuestionKind::SingleChoice | QuestionKind::TrueFalse => {
            AnswerValue::choice(normalize(raw.trim()))
        }
        QuestionKind::MultipleChoice => AnswerValue::choices(
            raw.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|key| !key.is_empty())
                .map(normalize),
        ),
        QuestionKind::ShortAnswer | QuestionKind::Essay => AnswerValue::text(raw),
    }
}

/// The cleared value for the question's kind.
#[must_use]
pub fn blank_for(question: &Question) -> AnswerValue {
    match question.kind() {
        QuestionKind::SingleChoice | QuestionKind::TrueFalse => AnswerValue::choice(""),
        QuestionKind::MultipleChoice => AnswerValue::choices(Vec::<String>::new()),
        QuestionKind::ShortAnswer | QuestionKind::Essay => AnswerValue::text(""),
    }
}

pub const HELP: &str = "\
commands:
  next | prev | goto <n>      move between questions
  answer <keys or text>       answer the current question
  clear                       clear the current answer
  mark                        toggle the review flag
  status                      show progress and save state
  submit                      review the summary, then `yes` to submit
  retry                       retry a failed submission
  hide | show | menu | key <combo>
                              simulate environment signals
  quit                        leave without submitting";

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{QuestionId, QuestionOption};

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
        assert_eq!(
            ConsoleCommand::parse("goto 12").unwrap(),
            Some(ConsoleCommand::GoTo(12))
        );
        assert_eq!(
            ConsoleCommand::parse("answer  the Pacific ").unwrap(),
            Some(ConsoleCommand::Answer("the Pacific".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("key ctrl+c").unwrap(),
            Some(ConsoleCommand::Signal(EnvironmentSignal::KeyCombo(
                KeyCombo::ctrl("c")
            )))
        );
        assert_eq!(
            ConsoleCommand::parse("goto").unwrap_err(),
            CommandError::MissingArgument { command: "goto" }
        );
        assert!(matches!(
            ConsoleCommand::parse("dance"),
            Err(CommandError::Unknown(_))
        ));
    }

    #[test]
    fn answers_follow_question_kind() {
        let multi = Question::new(
            QuestionId::new(1),
            QuestionKind::MultipleChoice,
            "Pick",
            vec![QuestionOption::new("A", "a"), QuestionOption::new("C", "c")],
            1,
        )
        .unwrap();
        assert_eq!(answer_for(&multi, "c, a"), AnswerValue::choices(["A", "C"]));
        assert!(blank_for(&multi).is_blank());

        let essay =
            Question::new(QuestionId::new(2), QuestionKind::Essay, "Why", Vec::new(), 1).unwrap();
        assert_eq!(answer_for(&essay, "tides"), AnswerValue::text("tides"));
    }
}
