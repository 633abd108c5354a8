pub mod coordinator;
pub mod error;
pub mod persona;
pub mod responder;
pub mod session;
pub mod speech;
pub mod subject;
pub mod turn;

use crate::error::{ServiceError, SpeechError};
use crate::speech::PlaybackSignal;
use crate::turn::ConversationTurn;

/// Represents commands that the core logic (`TurnCoordinator`) issues to the runtime.
///
/// This enum decouples the coordinator's decisions from the side effects the
/// runtime performs (remote calls, speech, microphone). Every command that
/// starts an operation carries the generation its completion must echo back.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask the teacher for a reply to `turns`.
    RequestReply {
        generation: u64,
        turns: Vec<ConversationTurn>,
    },
    /// Speak `text`, replacing anything currently being spoken.
    Speak { generation: u64, text: String },
    /// Stop the current utterance.
    CancelSpeech,
    /// Start listening to the microphone.
    StartCapture { generation: u64 },
    /// Stop listening and transcribe what was heard.
    StopCapture { generation: u64 },
    /// Stop listening and throw away what was heard.
    AbortCapture,
    /// Show a transient, dismissible notice.
    Notify(Notice),
}

/// Everything the coordinator reacts to: user actions from the shell and
/// completions reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    UserText(String),
    VoiceTranscript(String),
    Skip,
    /// Start listening, or stop and submit when already listening.
    ToggleCapture,
    AbortCapture,
    Reply {
        generation: u64,
        result: Result<String, ServiceError>,
    },
    Playback {
        generation: u64,
        signal: PlaybackSignal,
    },
    CaptureUpdate {
        generation: u64,
        text: String,
    },
    CaptureEnded {
        generation: u64,
        result: Result<String, SpeechError>,
    },
    EndSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Service,
    Capture,
    Playback,
}

/// A non-blocking error notice for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn service(error: &ServiceError) -> Self {
        Self {
            kind: NoticeKind::Service,
            message: format!("Failed to get a response from the teacher: {error}"),
        }
    }

    pub fn speech(error: &SpeechError) -> Self {
        let kind = match error {
            SpeechError::CaptureUnsupported | SpeechError::CaptureError(_) => NoticeKind::Capture,
            SpeechError::PlaybackUnsupported | SpeechError::PlaybackError(_) => {
                NoticeKind::Playback
            }
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}
