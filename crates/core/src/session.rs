//! The classroom runtime.
//!
//! [`ClassroomSession`] owns a [`TurnCoordinator`] and the host capabilities.
//! User actions and operation completions arrive as [`Input`]s on a single
//! channel; the coordinator turns each into [`Command`]s, which the session
//! executes by spawning tasks that report back on the same channel. The shell
//! observes the session through [`SessionEvent`]s.

use crate::coordinator::{CoordinatorOptions, SilentPolicy, TeacherState, TurnCoordinator, TurnState};
use crate::responder::ResponseClient;
use crate::speech::{
    DEFAULT_WORDS_PER_MINUTE, PacedPlayback, PlaybackSignal, SpeechCapture, SpeechPlayback,
};
use crate::subject::Subject;
use crate::turn::{Conversation, ConversationTurn};
use crate::{Command, Input, Notice};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INPUT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub silent_policy: SilentPolicy,
    pub history_window: Option<usize>,
    /// Pace of the silent stand-in used when the host cannot play speech.
    pub words_per_minute: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            silent_policy: SilentPolicy::default(),
            history_window: None,
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }
}

/// A snapshot of everything the classroom screen shows.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub subject: Subject,
    pub state: TurnState,
    pub teacher: TeacherState,
    /// Conversation turns without the persona instructions.
    pub turns: Vec<ConversationTurn>,
    pub listening: bool,
    pub live_transcript: String,
    pub input_enabled: bool,
    pub capture_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Updated(SessionView),
    Notice(Notice),
}

#[derive(Debug, thiserror::Error)]
#[error("the classroom session has ended")]
pub struct SessionClosed;

/// Sends user actions to a running [`ClassroomSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    input_tx: mpsc::Sender<Input>,
}

impl SessionHandle {
    pub async fn send(&self, input: Input) -> Result<(), SessionClosed> {
        self.input_tx.send(input).await.map_err(|_| SessionClosed)
    }

    pub async fn submit_text(&self, text: impl Into<String>) -> Result<(), SessionClosed> {
        self.send(Input::UserText(text.into())).await
    }

    pub async fn skip(&self) -> Result<(), SessionClosed> {
        self.send(Input::Skip).await
    }

    pub async fn toggle_capture(&self) -> Result<(), SessionClosed> {
        self.send(Input::ToggleCapture).await
    }

    pub async fn end(&self) -> Result<(), SessionClosed> {
        self.send(Input::EndSession).await
    }
}

pub struct ClassroomSession {
    coordinator: TurnCoordinator,
    responder: Arc<dyn ResponseClient>,
    playback: Box<dyn SpeechPlayback>,
    capture: Box<dyn SpeechCapture>,
    /// Only the handles keep the input channel open; tasks upgrade this to
    /// report back.
    input_tx: mpsc::WeakSender<Input>,
    input_rx: mpsc::Receiver<Input>,
    events: mpsc::UnboundedSender<SessionEvent>,
    reply_task: Option<JoinHandle<()>>,
    transcript_task: Option<JoinHandle<()>>,
    capture_task: Option<JoinHandle<()>>,
}

impl ClassroomSession {
    /// Opens a classroom for `subject` and starts speaking its introduction.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        subject: &Subject,
        persona_prompt: impl Into<String>,
        responder: Arc<dyn ResponseClient>,
        playback: Box<dyn SpeechPlayback>,
        capture: Box<dyn SpeechCapture>,
        options: SessionOptions,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let playback_supported = playback.is_supported();
        let capture_supported = capture.is_supported();
        let playback: Box<dyn SpeechPlayback> =
            if !playback_supported && options.silent_policy == SilentPolicy::Animate {
                tracing::info!("speech output unavailable, pacing replies silently");
                Box::new(PacedPlayback::new(options.words_per_minute))
            } else {
                playback
            };

        let (coordinator, commands) = TurnCoordinator::start(
            subject,
            persona_prompt,
            CoordinatorOptions {
                playback_supported,
                capture_supported,
                silent_policy: options.silent_policy,
                history_window: options.history_window,
            },
        );

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (events, events_rx) = mpsc::unbounded_channel();
        let weak_input_tx = input_tx.downgrade();
        let handle = SessionHandle { input_tx };

        let mut session = Self {
            coordinator,
            responder,
            playback,
            capture,
            input_tx: weak_input_tx,
            input_rx,
            events,
            reply_task: None,
            transcript_task: None,
            capture_task: None,
        };
        session.execute_all(commands);
        (session, handle, events_rx)
    }

    /// Waits for the next input and applies it. Returns `false` once the
    /// session has ended.
    pub async fn step(&mut self) -> bool {
        if self.coordinator.is_ended() {
            return false;
        }
        match self.input_rx.recv().await {
            Some(input) => {
                self.process(input);
                !self.coordinator.is_ended()
            }
            None => false,
        }
    }

    /// Runs until the session is ended, or every [`SessionHandle`] is
    /// dropped, and returns the final conversation.
    pub async fn run(mut self) -> Conversation {
        while self.step().await {}
        if !self.coordinator.is_ended() {
            tracing::info!("all session handles dropped, closing the classroom");
            let commands = self.coordinator.end_session();
            self.execute_all(commands);
        }
        self.release_devices();
        self.shutdown();
        self.coordinator.conversation().clone()
    }

    pub fn view(&self) -> SessionView {
        let coordinator = &self.coordinator;
        SessionView {
            subject: *coordinator.subject(),
            state: coordinator.state(),
            teacher: coordinator.teacher().clone(),
            turns: coordinator.conversation().visible().cloned().collect(),
            listening: coordinator.is_listening(),
            live_transcript: coordinator.live_transcript().to_string(),
            input_enabled: coordinator.input_enabled(),
            capture_available: coordinator.options().capture_supported,
        }
    }

    pub fn coordinator(&self) -> &TurnCoordinator {
        &self.coordinator
    }

    fn process(&mut self, input: Input) {
        let mut commands = self.coordinator.handle(input);
        let mut follow_ups = VecDeque::new();
        loop {
            for command in commands {
                if let Some(input) = self.execute(command) {
                    follow_ups.push_back(input);
                }
            }
            match follow_ups.pop_front() {
                Some(input) => commands = self.coordinator.handle(input),
                None => break,
            }
        }
        self.publish();
    }

    fn execute_all(&mut self, commands: Vec<Command>) {
        let mut follow_ups = Vec::new();
        for command in commands {
            if let Some(input) = self.execute(command) {
                follow_ups.push(input);
            }
        }
        if follow_ups.is_empty() {
            self.publish();
        }
        for input in follow_ups {
            self.process(input);
        }
    }

    /// Carries out one command. Failures that happen synchronously come back
    /// as an input to apply right away.
    fn execute(&mut self, command: Command) -> Option<Input> {
        match command {
            Command::RequestReply { generation, turns } => {
                if let Some(task) = self.reply_task.take() {
                    task.abort();
                }
                let responder = self.responder.clone();
                let input_tx = self.input_tx.clone();
                self.reply_task = Some(tokio::spawn(async move {
                    let result = responder.get_reply(&turns).await;
                    if !report(&input_tx, Input::Reply { generation, result }).await {
                        tracing::debug!(generation, "session closed before the reply arrived");
                    }
                }));
                None
            }
            Command::Speak { generation, text } => {
                let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
                let input_tx = self.input_tx.clone();
                tokio::spawn(async move {
                    while let Some(signal) = signal_rx.recv().await {
                        if !report(&input_tx, Input::Playback { generation, signal }).await {
                            break;
                        }
                    }
                });
                match self.playback.speak(&text, signal_tx) {
                    Ok(()) => None,
                    Err(error) => Some(Input::Playback {
                        generation,
                        signal: PlaybackSignal::Failed(error),
                    }),
                }
            }
            Command::CancelSpeech => {
                self.playback.cancel();
                None
            }
            Command::StartCapture { generation } => match self.capture.start() {
                Ok(mut updates) => {
                    let input_tx = self.input_tx.clone();
                    self.transcript_task = Some(tokio::spawn(async move {
                        while let Some(text) = updates.next().await {
                            if !report(&input_tx, Input::CaptureUpdate { generation, text }).await {
                                break;
                            }
                        }
                    }));
                    None
                }
                Err(error) => Some(Input::CaptureEnded {
                    generation,
                    result: Err(error),
                }),
            },
            Command::StopCapture { generation } => {
                if let Some(task) = self.transcript_task.take() {
                    task.abort();
                }
                let transcript = self.capture.stop();
                let input_tx = self.input_tx.clone();
                self.capture_task = Some(tokio::spawn(async move {
                    let result = transcript.await;
                    if !report(&input_tx, Input::CaptureEnded { generation, result }).await {
                        tracing::debug!(generation, "session closed before transcription finished");
                    }
                }));
                None
            }
            Command::AbortCapture => {
                self.capture.abort();
                self.abort_capture_tasks();
                None
            }
            Command::Notify(notice) => {
                let _ = self.events.send(SessionEvent::Notice(notice));
                None
            }
        }
    }

    fn publish(&self) {
        let _ = self.events.send(SessionEvent::Updated(self.view()));
    }

    fn abort_capture_tasks(&mut self) {
        if let Some(task) = self.transcript_task.take() {
            task.abort();
        }
        if let Some(task) = self.capture_task.take() {
            task.abort();
        }
    }

    /// Makes sure nothing is left playing or recording once the classroom
    /// has closed.
    fn release_devices(&mut self) {
        if self.playback.is_speaking() {
            tracing::warn!("speech still playing after the classroom closed");
            self.playback.cancel();
        }
        if self.capture.is_listening() {
            tracing::warn!("microphone still recording after the classroom closed");
            self.capture.abort();
        }
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        self.abort_capture_tasks();
    }
}

/// Sends `input` to the session. Returns `false` once the session is gone.
async fn report(input_tx: &mpsc::WeakSender<Input>, input: Input) -> bool {
    match input_tx.upgrade() {
        Some(input_tx) => input_tx.send(input).await.is_ok(),
        None => false,
    }
}

impl Drop for ClassroomSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
