//! Host speech capabilities.
//!
//! Speech-to-text and text-to-speech are optional host features. The
//! coordinator never calls them directly: the session runtime drives these
//! traits, and a host without a capability is given one of the `Unsupported*`
//! implementations instead.

mod paced;

pub use paced::{DEFAULT_WORDS_PER_MINUTE, PacedPlayback};

use crate::error::SpeechError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle signals of one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSignal {
    Started,
    Completed,
    Canceled,
    Failed(SpeechError),
}

/// Incremental transcript updates of one capture.
pub type TranscriptStream = BoxStream<'static, String>;

/// Renders text as speech.
#[cfg_attr(test, automock)]
pub trait SpeechPlayback: Send {
    fn is_supported(&self) -> bool;

    /// Starts rendering `text`, cancelling whatever was playing before.
    ///
    /// Signals for this utterance go to `signals`; a canceled utterance may
    /// still deliver `Canceled` after the next one started.
    fn speak(
        &mut self,
        text: &str,
        signals: UnboundedSender<PlaybackSignal>,
    ) -> Result<(), SpeechError>;

    /// Stops the current utterance. Safe to call when nothing is playing.
    fn cancel(&mut self);

    fn is_speaking(&self) -> bool;
}

/// Turns live audio into transcript text.
#[cfg_attr(test, automock)]
pub trait SpeechCapture: Send {
    fn is_supported(&self) -> bool;

    /// Begins listening. Calling it again after a capture ended starts fresh.
    fn start(&mut self) -> Result<TranscriptStream, SpeechError>;

    /// Ends listening and resolves to the final transcript.
    ///
    /// When nothing is being captured the future resolves to an empty string.
    fn stop(&mut self) -> BoxFuture<'static, Result<String, SpeechError>>;

    /// Discards the current capture, if any.
    fn abort(&mut self);

    fn is_listening(&self) -> bool;
}

/// Playback for hosts without text-to-speech.
#[derive(Debug, Default)]
pub struct UnsupportedPlayback;

impl SpeechPlayback for UnsupportedPlayback {
    fn is_supported(&self) -> bool {
        false
    }

    fn speak(
        &mut self,
        _text: &str,
        _signals: UnboundedSender<PlaybackSignal>,
    ) -> Result<(), SpeechError> {
        Err(SpeechError::PlaybackUnsupported)
    }

    fn cancel(&mut self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

/// Capture for hosts without speech-to-text; the shell falls back to typing.
#[derive(Debug, Default)]
pub struct UnsupportedCapture;

impl SpeechCapture for UnsupportedCapture {
    fn is_supported(&self) -> bool {
        false
    }

    fn start(&mut self) -> Result<TranscriptStream, SpeechError> {
        Err(SpeechError::CaptureUnsupported)
    }

    fn stop(&mut self) -> BoxFuture<'static, Result<String, SpeechError>> {
        Box::pin(async { Ok(String::new()) })
    }

    fn abort(&mut self) {}

    fn is_listening(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_playback_refuses_to_speak() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut playback = UnsupportedPlayback;
        assert!(!playback.is_supported());
        assert_eq!(
            playback.speak("hello", tx),
            Err(SpeechError::PlaybackUnsupported)
        );
        playback.cancel();
        playback.cancel();
        assert!(!playback.is_speaking());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsupported_capture_stops_with_empty_transcript() {
        let mut capture = UnsupportedCapture;
        assert!(!capture.is_supported());
        assert!(matches!(capture.start(), Err(SpeechError::CaptureUnsupported)));
        assert_eq!(capture.stop().await, Ok(String::new()));
        assert_eq!(capture.stop().await, Ok(String::new()));
    }
}
