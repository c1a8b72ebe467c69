mod console;

use std::fmt;
use std::path::PathBuf;

use exam_core::model::{ExamId, SessionSettings};
use services::{Clock, EnvironmentBus, ExamSession, ExamSessionService, SessionEvent};
use services::session::{SubmitConfirmation, SubmitOutcome};
use storage::demo::seed_demo_exam;
use storage::repository::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt as log_fmt, prelude::*};

use console::{ConsoleCommand, HELP, answer_for, blank_for};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidExamId { raw: String },
    InvalidDuration { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidExamId { raw } => write!(f, "invalid --exam-id value: {raw}"),
            ArgsError::InvalidDuration { raw } => write!(f, "invalid --duration value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run  [--db <sqlite_url>] [--exam-id <id>] [--settings <file>]");
    eprintln!("  cargo run -p app -- seed [--db <sqlite_url>] [--exam-id <id>] [--duration <secs>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:exam.sqlite3?mode=rwc");
    eprintln!("  --exam-id 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EXAM_DB_URL, EXAM_ID, EXAM_SETTINGS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    exam_id: ExamId,
    settings_path: Option<PathBuf>,
    title: String,
    duration_secs: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("EXAM_DB_URL")
                .unwrap_or_else(|_| "sqlite:exam.sqlite3?mode=rwc".into()),
            exam_id: std::env::var("EXAM_ID")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map_or_else(|| ExamId::new(1), ExamId::new),
            settings_path: std::env::var_os("EXAM_SETTINGS").map(PathBuf::from),
            title: "General Science".into(),
            duration_secs: 1800,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = value;
                }
                "--exam-id" => {
                    let value = require_value(args, "--exam-id")?;
                    parsed.exam_id = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidExamId { raw: value.clone() })?;
                }
                "--settings" => {
                    parsed.settings_path = Some(require_value(args, "--settings")?.into());
                }
                "--title" => {
                    parsed.title = require_value(args, "--title")?;
                }
                "--duration" => {
                    let value = require_value(args, "--duration")?;
                    parsed.duration_secs = value
                        .parse()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .ok_or(ArgsError::InvalidDuration { raw: value })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(parsed)
    }

    fn load_settings(&self) -> Result<SessionSettings, Box<dyn std::error::Error>> {
        let Some(path) = &self.settings_path else {
            return Ok(SessionSettings::default());
        };
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn init_tracing() {
    // stdout carries the session transcript; logs go to stderr.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(log_fmt::layer().with_writer(std::io::stderr).without_time())
        .try_init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1).peekable();

    let cmd = match argv.peek().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => {
            let cmd = Command::from_arg(first).ok_or_else(|| {
                eprintln!("unknown subcommand: {first}");
                print_usage();
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
            })?;
            argv.next();
            cmd
        }
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&parsed.db_url).await?;
    match cmd {
        Command::Seed => {
            let count = seed_demo_exam(
                storage.exams.as_ref(),
                parsed.exam_id,
                &parsed.title,
                parsed.duration_secs,
            )
            .await?;
            println!(
                "seeded exam {} with {count} questions into {}",
                parsed.exam_id, parsed.db_url
            );
            Ok(())
        }
        Command::Run => {
            let settings = parsed.load_settings()?;
            let service = ExamSessionService::from_storage(Clock::default_clock(), &storage)
                .with_settings(settings);
            let bus = EnvironmentBus::default();
            let session = service.start_session(parsed.exam_id, &bus).await?;
            drive(&session, &bus).await?;
            session.teardown();

            let progress = service
                .fetch_progress(parsed.exam_id, session.attempt_id())
                .await?;
            println!(
                "attempt {} {}: {} answered on the server",
                session.attempt_id(),
                session.status(),
                progress.answered_count
            );
            Ok(())
        }
    }
}

fn show_question(session: &ExamSession) {
    let view = session.view();
    let Some(question) = &view.current_question else {
        return;
    };
    let marked = if view.review_marks.contains(&question.id()) {
        " [marked]"
    } else {
        ""
    };
    println!();
    println!(
        "Question {}/{} ({}, {} pt){marked}  time left {}",
        view.current_index + 1,
        view.total,
        question.kind(),
        question.points(),
        view.remaining
    );
    println!("{}", question.content());
    for option in question.options() {
        println!("  {}) {}", option.key, option.text);
    }
    if let Some(answer) = view.answers.get(&question.id()) {
        println!("current answer: {answer:?}");
    }
}

fn show_status(session: &ExamSession) {
    let view = session.view();
    println!(
        "{}: {} of {} answered, {} marked, {} left, {}, {} violations, submission {:?}",
        view.exam_title,
        view.answered,
        view.total,
        view.review_marks.len(),
        view.remaining,
        view.save.label(Clock::default_clock().now()),
        view.violation_count,
        view.submission
    );
}

fn print_confirmation(confirmation: &SubmitConfirmation) {
    println!(
        "Submit now? {} answered, {} unanswered, {} marked for review, {} left. Type `yes` to submit.",
        confirmation.answered,
        confirmation.unanswered,
        confirmation.marked_for_review,
        confirmation.remaining
    );
}

/// Read commands from stdin until the attempt is final or input ends.
async fn drive(
    session: &ExamSession,
    bus: &EnvironmentBus,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<SubmitConfirmation> = None;

    println!("{HELP}");
    show_question(session);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Warning { remaining, .. }) => {
                    println!("!! {remaining} remaining");
                }
                Ok(SessionEvent::Expired) => println!("!! time is up, submitting"),
                Ok(SessionEvent::SaveFailed { consecutive_failures, .. }) => {
                    println!("!! autosave failed ({consecutive_failures} in a row), will retry");
                }
                Ok(SessionEvent::ViolationRecorded { kind, total }) => {
                    println!("!! integrity: {kind:?} (total {total})");
                }
                Ok(SessionEvent::Submitted { status }) => {
                    println!("attempt {status}");
                    return Ok(());
                }
                Ok(SessionEvent::SubmitFailed { reason }) => {
                    println!("!! submission failed: {reason}. Type `retry`.");
                }
                Ok(SessionEvent::Saved { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let command = match ConsoleCommand::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                if command != ConsoleCommand::Confirm {
                    pending = None;
                }
                match command {
                    ConsoleCommand::Next => {
                        session.next();
                        show_question(session);
                    }
                    ConsoleCommand::Previous => {
                        session.previous();
                        show_question(session);
                    }
                    ConsoleCommand::GoTo(number) => {
                        session.go_to(number.saturating_sub(1));
                        show_question(session);
                    }
                    ConsoleCommand::Answer(raw) => {
                        let accepted = session
                            .current_question()
                            .is_some_and(|q| session.set_answer(q.id(), answer_for(&q, &raw)));
                        if !accepted {
                            println!("answer not accepted");
                        }
                    }
                    ConsoleCommand::Clear => {
                        if let Some(q) = session.current_question() {
                            session.set_answer(q.id(), blank_for(&q));
                        }
                    }
                    ConsoleCommand::Mark => {
                        if let Some(q) = session.current_question() {
                            session.toggle_review(q.id());
                        }
                        show_question(session);
                    }
                    ConsoleCommand::Signal(signal) => {
                        bus.publish(signal);
                    }
                    ConsoleCommand::Status => show_status(session),
                    ConsoleCommand::Submit => {
                        let confirmation = session.prepare_submit();
                        print_confirmation(&confirmation);
                        pending = Some(confirmation);
                    }
                    ConsoleCommand::Confirm => match pending.take() {
                        Some(confirmation) => report(session.submit_confirmed(confirmation).await),
                        None => println!("nothing to confirm; type `submit` first"),
                    },
                    ConsoleCommand::Cancel => println!("submission cancelled"),
                    ConsoleCommand::Retry => report(session.retry_submit().await),
                    ConsoleCommand::Help => println!("{HELP}"),
                    ConsoleCommand::Quit => return Ok(()),
                }
            }
        }
    }
}

fn report(result: Result<SubmitOutcome, services::SessionError>) {
    match result {
        Ok(SubmitOutcome::Submitted) => {}
        Ok(SubmitOutcome::AlreadyInProgress) => println!("submission already in progress"),
        Ok(SubmitOutcome::AlreadySubmitted) => println!("attempt already submitted"),
        Err(err) => println!("{err}"),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
