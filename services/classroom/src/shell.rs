//! Terminal presentation of the classroom.
//!
//! Turns [`SessionEvent`]s into printable lines and typed lines into shell
//! commands. Nothing here touches stdin or stdout directly.

use classroom_core::coordinator::TurnState;
use classroom_core::session::{SessionEvent, SessionView};
use classroom_core::subject::Subject;
use classroom_core::turn::Role;

pub const HELP: &str = "Type a question and press Enter. Commands: /talk (microphone on/off), /skip (stop speaking), /help, /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Ask(String),
    Skip,
    Talk,
    Help,
    Quit,
    Unknown(String),
}

/// Parses one typed line. Blank lines produce nothing.
pub fn parse_line(line: &str) -> Option<ShellCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let command = match line {
        "/skip" => ShellCommand::Skip,
        "/talk" => ShellCommand::Talk,
        "/help" => ShellCommand::Help,
        "/quit" | "/exit" => ShellCommand::Quit,
        other if other.starts_with('/') => ShellCommand::Unknown(other.to_string()),
        other => ShellCommand::Ask(other.to_string()),
    };
    Some(command)
}

/// The dashboard: one card per subject.
pub fn render_catalog(subjects: &[&Subject]) -> String {
    if subjects.is_empty() {
        return "No subjects match your search.".to_string();
    }
    subjects
        .iter()
        .map(|subject| {
            format!(
                "{} ({})\n  {}\n  with {}, {}",
                subject.name,
                subject.id,
                subject.description,
                subject.teacher_name,
                subject.teacher_title
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Avatar header shown when a classroom opens.
pub fn avatar_line(subject: &Subject) -> String {
    format!(
        "[{}] {}, {} ({})",
        subject.initials(),
        subject.teacher_name,
        subject.teacher_title,
        subject.name
    )
}

/// The status line under the avatar.
pub fn status_line(view: &SessionView) -> String {
    if view.listening {
        return if view.live_transcript.is_empty() {
            "Listening... (/talk to send)".to_string()
        } else {
            format!("Listening: {}", view.live_transcript)
        };
    }
    match view.state {
        TurnState::AwaitingResponse => "Teacher is thinking...".to_string(),
        TurnState::Speaking if view.teacher.speaking => {
            format!("[{}] Teacher is speaking... (/skip to stop)", view.subject.initials())
        }
        _ if view.capture_available => "Ask a question using voice or text".to_string(),
        _ => "Ask a question using text".to_string(),
    }
}

/// Prints only what changed between two views.
#[derive(Debug, Default)]
pub struct Renderer {
    printed_turns: usize,
    last_status: Option<String>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::Notice(notice) => vec![format!("! {}", notice.message)],
            SessionEvent::Updated(view) => {
                let mut lines: Vec<String> = view
                    .turns
                    .iter()
                    .skip(self.printed_turns)
                    .map(|turn| match turn.role() {
                        Role::User => format!("You: {}", turn.content()),
                        _ => format!("{}: {}", view.subject.teacher_name, turn.content()),
                    })
                    .collect();
                self.printed_turns = self.printed_turns.max(view.turns.len());

                let status = status_line(view);
                if self.last_status.as_deref() != Some(status.as_str()) {
                    lines.push(format!("-- {status}"));
                    self.last_status = Some(status);
                }
                lines
            }
        }
    }
}
