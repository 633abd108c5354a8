use super::{PlaybackSignal, SpeechPlayback};
use crate::error::SpeechError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

pub const DEFAULT_WORDS_PER_MINUTE: u32 = 160;

/// Silent playback that "speaks" for as long as reading the text aloud would
/// take.
///
/// Used when the host has no audio output but the avatar should still animate
/// through the answer. Requires a Tokio runtime.
pub struct PacedPlayback {
    words_per_minute: u32,
    utterance: Arc<AtomicU64>,
    speaking: Arc<AtomicBool>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl PacedPlayback {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
            utterance: Arc::new(AtomicU64::new(0)),
            speaking: Arc::new(AtomicBool::new(false)),
            cancel_tx: None,
        }
    }

    /// Estimated speaking time for `text`.
    pub fn duration_for(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u64;
        Duration::from_millis(words * 60_000 / u64::from(self.words_per_minute))
    }
}

impl Default for PacedPlayback {
    fn default() -> Self {
        Self::new(DEFAULT_WORDS_PER_MINUTE)
    }
}

impl SpeechPlayback for PacedPlayback {
    fn is_supported(&self) -> bool {
        true
    }

    fn speak(
        &mut self,
        text: &str,
        signals: UnboundedSender<PlaybackSignal>,
    ) -> Result<(), SpeechError> {
        self.cancel();

        let id = self.utterance.fetch_add(1, Ordering::AcqRel) + 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_tx = Some(cancel_tx);
        self.speaking.store(true, Ordering::Release);

        let duration = self.duration_for(text);
        let utterance = self.utterance.clone();
        let speaking = self.speaking.clone();
        tokio::spawn(async move {
            let _ = signals.send(PlaybackSignal::Started);
            let signal = tokio::select! {
                _ = tokio::time::sleep(duration) => PlaybackSignal::Completed,
                _ = cancel_rx => PlaybackSignal::Canceled,
            };
            if utterance.load(Ordering::Acquire) == id {
                speaking.store(false, Ordering::Release);
            }
            let _ = signals.send(signal);
        });
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
        self.speaking.store(false, Ordering::Release);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn duration_scales_with_word_count() {
        let playback = PacedPlayback::new(120);
        assert_eq!(playback.duration_for(""), Duration::ZERO);
        assert_eq!(playback.duration_for("one two"), Duration::from_secs(1));
        assert_eq!(
            playback.duration_for("a b c d e f"),
            Duration::from_secs(3)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_the_estimated_duration() {
        let mut playback = PacedPlayback::new(60);
        let (tx, mut rx) = mpsc::unbounded_channel();
        playback.speak("three short words", tx).unwrap();
        assert!(playback.is_speaking());

        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Completed));
        assert!(!playback.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_reports_canceled() {
        let mut playback = PacedPlayback::new(60);
        let (tx, mut rx) = mpsc::unbounded_channel();
        playback.speak("a rather long answer about derivatives", tx).unwrap();
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));

        playback.cancel();
        playback.cancel();
        assert!(!playback.is_speaking());
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Canceled));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_again_cancels_the_previous_utterance() {
        let mut playback = PacedPlayback::new(60);
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        playback.speak("first answer here", first_tx).unwrap();
        playback.speak("second", second_tx).unwrap();

        assert_eq!(first_rx.recv().await, Some(PlaybackSignal::Started));
        assert_eq!(first_rx.recv().await, Some(PlaybackSignal::Canceled));
        assert_eq!(second_rx.recv().await, Some(PlaybackSignal::Started));
        assert_eq!(second_rx.recv().await, Some(PlaybackSignal::Completed));
        assert!(!playback.is_speaking());
    }
}
