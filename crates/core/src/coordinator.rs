use crate::error::{ServiceError, SpeechError, validate_submission};
use crate::speech::PlaybackSignal;
use crate::subject::Subject;
use crate::turn::Conversation;
use crate::{Command, Input, Notice};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Nothing outstanding; accepts text, voice and capture requests.
    Idle,
    /// A reply request is in flight; input is disabled.
    AwaitingResponse,
    /// The latest assistant turn is being spoken; accepts skip or a new question.
    Speaking,
}

/// What the avatar and the playback trigger read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeacherState {
    pub speaking: bool,
    pub current_response_text: String,
}

/// What to do with replies when the host cannot play speech.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SilentPolicy {
    /// Keep the speaking state so the avatar animates; the runtime renders
    /// speech silently.
    #[default]
    Animate,
    /// Bypass the speaking state entirely.
    Skip,
}

impl FromStr for SilentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "animate" => Ok(Self::Animate),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown silent policy '{other}' (expected animate or skip)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub playback_supported: bool,
    pub capture_supported: bool,
    pub silent_policy: SilentPolicy,
    /// Non-system turns sent with each request; `None` sends everything.
    pub history_window: Option<usize>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            playback_supported: true,
            capture_supported: true,
            silent_policy: SilentPolicy::default(),
            history_window: None,
        }
    }
}

/// The classroom turn state machine.
///
/// Owns the conversation and decides, for every user action or runtime
/// completion, what happens next. It performs no I/O: each operation returns
/// the [`Command`]s the runtime must execute. Outstanding operations are
/// tagged with a generation, and completions that do not match the active
/// generation are ignored.
pub struct TurnCoordinator {
    subject: Subject,
    conversation: Conversation,
    state: TurnState,
    teacher: TeacherState,
    options: CoordinatorOptions,
    last_generation: u64,
    pending_reply: Option<u64>,
    active_playback: Option<u64>,
    active_capture: Option<u64>,
    capture_stopping: bool,
    live_transcript: String,
    ended: bool,
}

impl TurnCoordinator {
    /// Opens a classroom: the conversation starts as the persona turn plus the
    /// subject's introduction, and the introduction is spoken right away.
    pub fn start(
        subject: &Subject,
        persona_prompt: impl Into<String>,
        options: CoordinatorOptions,
    ) -> (Self, Vec<Command>) {
        let mut conversation = Conversation::new(persona_prompt);
        conversation.push_assistant(subject.introduction);

        let mut coordinator = Self {
            subject: *subject,
            conversation,
            state: TurnState::Idle,
            teacher: TeacherState::default(),
            options,
            last_generation: 0,
            pending_reply: None,
            active_playback: None,
            active_capture: None,
            capture_stopping: false,
            live_transcript: String::new(),
            ended: false,
        };

        let mut commands = Vec::new();
        coordinator.present(subject.introduction.to_string(), &mut commands);
        tracing::info!(subject = subject.id, teacher = subject.teacher_name, "classroom opened");
        (coordinator, commands)
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        match input {
            Input::UserText(text) => self.submit_user_text(&text),
            Input::VoiceTranscript(text) => self.submit_voice_transcript(&text),
            Input::Skip => self.skip(),
            Input::ToggleCapture => self.toggle_capture(),
            Input::AbortCapture => self.abort_capture(),
            Input::Reply { generation, result } => self.reply(generation, result),
            Input::Playback { generation, signal } => self.playback(generation, signal),
            Input::CaptureUpdate { generation, text } => self.capture_update(generation, text),
            Input::CaptureEnded { generation, result } => self.capture_ended(generation, result),
            Input::EndSession => self.end_session(),
        }
    }

    pub fn submit_user_text(&mut self, text: &str) -> Vec<Command> {
        self.submit(text, "text")
    }

    pub fn submit_voice_transcript(&mut self, text: &str) -> Vec<Command> {
        self.submit(text, "voice")
    }

    fn submit(&mut self, text: &str, source: &'static str) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.ended {
            return commands;
        }
        let text = match validate_submission(text) {
            Ok(text) => text.to_string(),
            Err(e) => {
                tracing::debug!(source, "ignoring submission: {e}");
                return commands;
            }
        };
        if self.state == TurnState::AwaitingResponse {
            tracing::debug!(source, "input disabled while the teacher is thinking");
            return commands;
        }

        // Asking a new question skips the current answer.
        self.stop_speaking(&mut commands);
        if self.active_capture.take().is_some() {
            self.capture_stopping = false;
            self.live_transcript.clear();
            commands.push(Command::AbortCapture);
        }

        self.conversation.push_user(text);
        let generation = self.next_generation();
        self.pending_reply = Some(generation);
        self.state = TurnState::AwaitingResponse;
        tracing::info!(source, generation, turns = self.conversation.len(), "question submitted");

        commands.push(Command::RequestReply {
            generation,
            turns: self.conversation.request_turns(self.options.history_window),
        });
        commands
    }

    pub fn skip(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.state != TurnState::Speaking {
            tracing::debug!(state = ?self.state, "nothing to skip");
            return commands;
        }
        tracing::info!("response skipped");
        self.stop_speaking(&mut commands);
        commands
    }

    pub fn reply(&mut self, generation: u64, result: Result<String, ServiceError>) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.state != TurnState::AwaitingResponse || self.pending_reply != Some(generation) {
            tracing::debug!(generation, "ignoring stale reply");
            return commands;
        }
        self.pending_reply = None;

        match result {
            Ok(text) => {
                tracing::info!(generation, chars = text.len(), "teacher replied");
                self.conversation.push_assistant(text.clone());
                self.present(text, &mut commands);
            }
            Err(error) => {
                tracing::warn!(generation, "reply failed: {error}");
                self.state = TurnState::Idle;
                commands.push(Command::Notify(Notice::service(&error)));
            }
        }
        commands
    }

    pub fn playback(&mut self, generation: u64, signal: PlaybackSignal) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.active_playback != Some(generation) {
            tracing::debug!(generation, ?signal, "ignoring stale playback signal");
            return commands;
        }

        match signal {
            PlaybackSignal::Started => {
                tracing::debug!(generation, "speech started");
            }
            PlaybackSignal::Completed | PlaybackSignal::Canceled => {
                tracing::debug!(generation, ?signal, "speech finished");
                self.finish_speaking();
            }
            PlaybackSignal::Failed(error) => {
                tracing::warn!(generation, "speech failed: {error}");
                self.finish_speaking();
                commands.push(Command::Notify(Notice::speech(&error)));
            }
        }
        commands
    }

    pub fn toggle_capture(&mut self) -> Vec<Command> {
        if self.active_capture.is_some() {
            self.end_capture()
        } else {
            self.begin_capture()
        }
    }

    pub fn begin_capture(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.ended || self.active_capture.is_some() {
            return commands;
        }
        if !self.options.capture_supported {
            tracing::debug!("voice input is unavailable on this host");
            return commands;
        }
        if self.state == TurnState::AwaitingResponse {
            tracing::debug!("input disabled while the teacher is thinking");
            return commands;
        }

        self.stop_speaking(&mut commands);
        let generation = self.next_generation();
        self.active_capture = Some(generation);
        self.capture_stopping = false;
        self.live_transcript.clear();
        tracing::info!(generation, "listening");
        commands.push(Command::StartCapture { generation });
        commands
    }

    pub fn end_capture(&mut self) -> Vec<Command> {
        match self.active_capture {
            Some(generation) if !self.capture_stopping => {
                self.capture_stopping = true;
                vec![Command::StopCapture { generation }]
            }
            _ => Vec::new(),
        }
    }

    pub fn abort_capture(&mut self) -> Vec<Command> {
        if self.active_capture.take().is_none() {
            return Vec::new();
        }
        self.capture_stopping = false;
        self.live_transcript.clear();
        vec![Command::AbortCapture]
    }

    pub fn capture_update(&mut self, generation: u64, text: String) -> Vec<Command> {
        if self.active_capture == Some(generation) {
            self.live_transcript = text;
        }
        Vec::new()
    }

    pub fn capture_ended(
        &mut self,
        generation: u64,
        result: Result<String, SpeechError>,
    ) -> Vec<Command> {
        if self.active_capture != Some(generation) {
            tracing::debug!(generation, "ignoring stale capture result");
            return Vec::new();
        }
        self.active_capture = None;
        self.capture_stopping = false;
        self.live_transcript.clear();

        match result {
            Ok(transcript) if transcript.trim().is_empty() => {
                tracing::debug!(generation, "nothing was heard");
                Vec::new()
            }
            Ok(transcript) => self.submit_voice_transcript(&transcript),
            Err(error) => {
                tracing::warn!(generation, "capture failed: {error}");
                vec![Command::Notify(Notice::speech(&error))]
            }
        }
    }

    /// Leaves the classroom. Outstanding operations are cancelled and every
    /// later input is ignored.
    pub fn end_session(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if self.ended {
            return commands;
        }
        self.stop_speaking(&mut commands);
        if self.active_capture.take().is_some() {
            commands.push(Command::AbortCapture);
        }
        self.pending_reply = None;
        self.state = TurnState::Idle;
        self.ended = true;
        tracing::info!(turns = self.conversation.len(), "classroom closed");
        commands
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn teacher(&self) -> &TeacherState {
        &self.teacher
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn is_listening(&self) -> bool {
        self.active_capture.is_some()
    }

    pub fn live_transcript(&self) -> &str {
        &self.live_transcript
    }

    pub fn input_enabled(&self) -> bool {
        !self.ended && self.state != TurnState::AwaitingResponse
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn speech_enabled(&self) -> bool {
        self.options.playback_supported || self.options.silent_policy == SilentPolicy::Animate
    }

    /// Makes `text` the current response and speaks it when speech is enabled.
    fn present(&mut self, text: String, commands: &mut Vec<Command>) {
        self.teacher.current_response_text = text.clone();
        if self.speech_enabled() {
            let generation = self.next_generation();
            self.active_playback = Some(generation);
            self.teacher.speaking = true;
            self.state = TurnState::Speaking;
            commands.push(Command::Speak { generation, text });
        } else {
            self.teacher.speaking = false;
            self.state = TurnState::Idle;
        }
    }

    fn stop_speaking(&mut self, commands: &mut Vec<Command>) {
        if self.state == TurnState::Speaking {
            self.finish_speaking();
            commands.push(Command::CancelSpeech);
        }
    }

    fn finish_speaking(&mut self) {
        self.active_playback = None;
        self.teacher.speaking = false;
        if self.state == TurnState::Speaking {
            self.state = TurnState::Idle;
        }
    }
}
