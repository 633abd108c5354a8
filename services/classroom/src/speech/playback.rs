use super::SpeechApi;
use crate::config::{OUTPUT_BUFFER_SECS, OUTPUT_CHUNK_SIZE};
use anyhow::Context;
use classroom_core::error::SpeechError;
use classroom_core::speech::{PlaybackSignal, SpeechPlayback};
use classroom_native_utils::audio::{
    SPEECH_PCM16_SAMPLE_RATE, create_resampler, pcm16_le_to_f32, resample, shared_buffer,
};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const RESAMPLER_CHUNK_SIZE: usize = 480;
const POLL_INTERVAL: Duration = Duration::from_millis(20);
const FLUSH_WAIT: Duration = Duration::from_millis(200);

/// State shared between the playback tasks and the output stream callback.
#[derive(Debug, Default)]
pub struct OutputShared {
    /// Set when queued speech must not play; the callback empties the ring
    /// buffer and clears it.
    flush: AtomicBool,
    /// Samples pushed but not yet played.
    queued: AtomicUsize,
}

fn release(queued: &AtomicUsize, n: usize) {
    let _ = queued.fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
        Some(q.saturating_sub(n))
    });
}

/// Output stream callback body: plays queued speech on every channel and
/// silence once the buffer runs dry.
pub fn fill_output(
    data: &mut [f32],
    channels: usize,
    consumer: &mut HeapCons<f32>,
    shared: &OutputShared,
) {
    if shared.flush.swap(false, Ordering::AcqRel) {
        consumer.clear();
        shared.queued.store(0, Ordering::Release);
    }
    let mut played = 0;
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = match consumer.try_pop() {
            Some(sample) => {
                played += 1;
                sample
            }
            None => 0.0,
        };
        frame.fill(sample);
    }
    if played > 0 {
        release(&shared.queued, played);
    }
}

/// Text-to-speech through the remote speech endpoint and a `cpal` output
/// stream.
pub struct DevicePlayback {
    api: SpeechApi,
    output_sample_rate: f64,
    producer: Arc<Mutex<HeapProd<f32>>>,
    shared: Arc<OutputShared>,
    utterance: Arc<AtomicU64>,
    speaking: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    signals: Option<UnboundedSender<PlaybackSignal>>,
}

impl DevicePlayback {
    pub fn new(
        api: SpeechApi,
        output_sample_rate: f64,
        producer: HeapProd<f32>,
        shared: Arc<OutputShared>,
    ) -> Self {
        Self {
            api,
            output_sample_rate,
            producer: Arc::new(Mutex::new(producer)),
            shared,
            utterance: Arc::new(AtomicU64::new(0)),
            speaking: Arc::new(AtomicBool::new(false)),
            task: None,
            signals: None,
        }
    }
}

impl SpeechPlayback for DevicePlayback {
    fn is_supported(&self) -> bool {
        true
    }

    fn speak(
        &mut self,
        text: &str,
        signals: UnboundedSender<PlaybackSignal>,
    ) -> Result<(), SpeechError> {
        self.cancel();
        // Leftovers of an utterance that ended without draining.
        if self.shared.queued.load(Ordering::Acquire) > 0 {
            self.shared.flush.store(true, Ordering::Release);
        }

        let id = self.utterance.fetch_add(1, Ordering::AcqRel) + 1;
        self.speaking.store(true, Ordering::Release);
        self.signals = Some(signals.clone());

        let stream = SpeechStream {
            api: self.api.clone(),
            output_sample_rate: self.output_sample_rate,
            producer: self.producer.clone(),
            shared: self.shared.clone(),
        };
        let text = text.to_string();
        let utterance = self.utterance.clone();
        let speaking = self.speaking.clone();
        self.task = Some(tokio::spawn(async move {
            let _ = signals.send(PlaybackSignal::Started);
            let signal = match stream.play(&text).await {
                Ok(()) => PlaybackSignal::Completed,
                Err(error) => {
                    tracing::warn!("Speech playback failed: {error}");
                    PlaybackSignal::Failed(error)
                }
            };
            if utterance.load(Ordering::Acquire) == id {
                speaking.store(false, Ordering::Release);
                if matches!(signal, PlaybackSignal::Failed(_)) {
                    stream.shared.flush.store(true, Ordering::Release);
                }
            }
            let _ = signals.send(signal);
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        self.utterance.fetch_add(1, Ordering::AcqRel);
        let signals = self.signals.take();
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
                self.shared.flush.store(true, Ordering::Release);
                if let Some(signals) = signals {
                    let _ = signals.send(PlaybackSignal::Canceled);
                }
            }
        }
        self.speaking.store(false, Ordering::Release);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }
}

/// One utterance: fetch, resample, queue, then wait for the device to drain.
struct SpeechStream {
    api: SpeechApi,
    output_sample_rate: f64,
    producer: Arc<Mutex<HeapProd<f32>>>,
    shared: Arc<OutputShared>,
}

impl SpeechStream {
    async fn play(&self, text: &str) -> Result<(), SpeechError> {
        let mut response = self.api.synthesize(text).await?;
        let mut resampler = create_resampler(
            SPEECH_PCM16_SAMPLE_RATE,
            self.output_sample_rate,
            RESAMPLER_CHUNK_SIZE,
        )
        .map_err(|e| SpeechError::PlaybackError(e.to_string()))?;

        self.wait_for_flush().await;

        let mut bytes: Vec<u8> = Vec::new();
        let mut samples: Vec<f32> = Vec::new();
        loop {
            let chunk = tokio::time::timeout(self.api.timeout(), response.chunk())
                .await
                .map_err(|_| SpeechError::PlaybackError("speech audio stalled".into()))?
                .map_err(|e| SpeechError::PlaybackError(e.to_string()))?;
            let Some(chunk) = chunk else {
                break;
            };
            bytes.extend_from_slice(&chunk);
            let whole = bytes.len() & !1;
            samples.extend(pcm16_le_to_f32(&bytes[..whole]));
            bytes.drain(..whole);

            let ready = samples.len() / RESAMPLER_CHUNK_SIZE * RESAMPLER_CHUNK_SIZE;
            if ready > 0 {
                let out = resample(&mut resampler, &samples[..ready]);
                samples.drain(..ready);
                self.push(&out).await?;
            }
        }
        if !samples.is_empty() {
            let out = resample(&mut resampler, &samples);
            self.push(&out).await?;
        }

        while self.shared.queued.load(Ordering::Acquire) > 0 {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    /// Waits for the callback to finish flushing a canceled utterance. Gives
    /// up after a short while in case the output stream is not running.
    async fn wait_for_flush(&self) {
        let mut waited = Duration::ZERO;
        while self.shared.flush.load(Ordering::Acquire) && waited < FLUSH_WAIT {
            tokio::time::sleep(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;
        }
    }

    async fn push(&self, mut samples: &[f32]) -> Result<(), SpeechError> {
        while !samples.is_empty() {
            let pushed = {
                let mut producer = self
                    .producer
                    .lock()
                    .map_err(|_| SpeechError::PlaybackError("output buffer poisoned".into()))?;
                self.shared.queued.fetch_add(samples.len(), Ordering::AcqRel);
                let pushed = producer.push_slice(samples);
                release(&self.shared.queued, samples.len() - pushed);
                pushed
            };
            samples = &samples[pushed..];
            if !samples.is_empty() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        Ok(())
    }
}

/// Opens the output device and starts its stream.
///
/// The returned stream must stay alive for as long as the playback is used.
pub fn open_output(
    device_name: Option<&str>,
    api: SpeechApi,
) -> anyhow::Result<(cpal::Stream, DevicePlayback)> {
    let output = classroom_native_utils::device::get_or_default_output(device_name)
        .context("Failed to get audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);
    for config in output.supported_output_configs()? {
        tracing::debug!("Supported output config: {:?}", config);
    }

    let output_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = StreamConfig {
        channels: output_config.channels(),
        sample_rate: output_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0 as f64;
    tracing::info!("Output stream config: {:?}", &output_config);

    let buffer = shared_buffer(output_config.sample_rate.0 as usize * OUTPUT_BUFFER_SECS);
    let (producer, mut consumer) = buffer.split();
    let shared = Arc::new(OutputShared::default());
    let callback_shared = shared.clone();

    let stream = output.build_output_stream(
        &output_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            fill_output(data, channel_count, &mut consumer, &callback_shared)
        },
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((
        stream,
        DevicePlayback::new(api, output_sample_rate, producer, shared),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::tests::{api_for, api_with_timeout, serve};
    use axum::body::{Body, Bytes};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use tokio::sync::mpsc;

    fn playback_for(base_url: &str) -> (DevicePlayback, HeapCons<f32>, Arc<OutputShared>) {
        playback_with(api_for(base_url), 48_000)
    }

    fn playback_with(
        api: SpeechApi,
        capacity: usize,
    ) -> (DevicePlayback, HeapCons<f32>, Arc<OutputShared>) {
        let (producer, consumer) = shared_buffer(capacity).split();
        let shared = Arc::new(OutputShared::default());
        let playback = DevicePlayback::new(api, SPEECH_PCM16_SAMPLE_RATE, producer, shared.clone());
        (playback, consumer, shared)
    }

    /// Drains the buffer like a real-time device until a final signal arrives.
    async fn play_until_done(
        rx: &mut mpsc::UnboundedReceiver<PlaybackSignal>,
        consumer: &mut HeapCons<f32>,
        shared: &OutputShared,
    ) -> PlaybackSignal {
        loop {
            let mut data = [0.0; 480];
            fill_output(&mut data, 1, consumer, shared);
            match rx.try_recv() {
                Ok(signal) => break signal,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    }

    #[test]
    fn output_callback_fills_every_channel_then_silence() {
        let (mut producer, mut consumer) = shared_buffer(16).split();
        let shared = OutputShared::default();
        producer.push_slice(&[0.25, -0.25]);
        shared.queued.store(2, Ordering::Release);

        let mut data = [1.0; 6];
        fill_output(&mut data, 2, &mut consumer, &shared);
        assert_eq!(data, [0.25, 0.25, -0.25, -0.25, 0.0, 0.0]);
        assert_eq!(shared.queued.load(Ordering::Acquire), 0);
    }

    #[test]
    fn output_callback_flushes_canceled_speech() {
        let (mut producer, mut consumer) = shared_buffer(16).split();
        let shared = OutputShared::default();
        producer.push_slice(&[0.5; 8]);
        shared.queued.store(8, Ordering::Release);
        shared.flush.store(true, Ordering::Release);

        let mut data = [1.0; 4];
        fill_output(&mut data, 1, &mut consumer, &shared);
        assert_eq!(data, [0.0; 4]);
        assert!(!shared.flush.load(Ordering::Acquire));
        assert_eq!(shared.queued.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn speaks_fetched_audio_and_completes_once_drained() {
        // 0x4000 little-endian is half scale.
        let pcm: Vec<u8> = [0x00, 0x40].repeat(2400);
        let router = Router::new().route(
            "/audio/speech",
            post(move || {
                let pcm = pcm.clone();
                async move { Bytes::from(pcm) }
            }),
        );
        let (mut playback, mut consumer, shared) = playback_for(&serve(router).await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.speak("Hello class", tx).unwrap();
        assert!(playback.is_speaking());
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));

        let mut played = Vec::new();
        let signal = loop {
            let mut data = [0.0; 480];
            fill_output(&mut data, 1, &mut consumer, &shared);
            played.extend_from_slice(&data);
            match rx.try_recv() {
                Ok(signal) => break signal,
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };
        assert_eq!(signal, PlaybackSignal::Completed);
        assert!(!playback.is_speaking());
        assert!(played.iter().any(|s| (s - 0.5).abs() < 0.05));
    }

    #[tokio::test]
    async fn cancel_flushes_and_reports_once() {
        let router = Router::new().route(
            "/audio/speech",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Bytes::new()
            }),
        );
        let (mut playback, _consumer, shared) = playback_for(&serve(router).await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.speak("A long answer", tx).unwrap();
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));

        playback.cancel();
        playback.cancel();
        assert!(!playback.is_speaking());
        assert!(shared.flush.load(Ordering::Acquire));
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Canceled));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn service_failure_is_reported_as_failed() {
        let router = Router::new().route(
            "/audio/speech",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let (mut playback, _consumer, _shared) = playback_for(&serve(router).await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.speak("Hello", tx).unwrap();
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));
        assert!(matches!(
            rx.recv().await,
            Some(PlaybackSignal::Failed(SpeechError::PlaybackError(_)))
        ));
        assert!(!playback.is_speaking());
    }

    #[tokio::test]
    async fn long_speech_outlasts_the_request_timeout() {
        // Two seconds of audio through a small buffer with a one second timeout.
        let pcm: Vec<u8> = [0x00, 0x40].repeat(48_000);
        let router = Router::new().route(
            "/audio/speech",
            post(move || {
                let pcm = pcm.clone();
                async move { Bytes::from(pcm) }
            }),
        );
        let api = api_with_timeout(&serve(router).await, 1);
        let (mut playback, mut consumer, shared) = playback_with(api, 4_800);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();

        playback.speak("A long answer", tx).unwrap();
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));

        let signal = play_until_done(&mut rx, &mut consumer, &shared).await;
        assert_eq!(signal, PlaybackSignal::Completed);
        assert!(started.elapsed() > Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failed_utterance_leaves_nothing_queued() {
        // Some audio, then the connection breaks.
        let router = Router::new().route(
            "/audio/speech",
            post(|| async {
                let chunks = futures::stream::iter(vec![
                    Ok(Bytes::from([0x00, 0x40].repeat(960))),
                    Err(std::io::Error::other("connection reset")),
                ]);
                Body::from_stream(chunks)
            }),
        );
        let (mut playback, mut consumer, shared) = playback_for(&serve(router).await);
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.speak("Hello", tx).unwrap();
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));
        assert!(matches!(
            rx.recv().await,
            Some(PlaybackSignal::Failed(SpeechError::PlaybackError(_)))
        ));
        assert!(shared.flush.load(Ordering::Acquire));

        let mut data = [1.0; 480];
        fill_output(&mut data, 1, &mut consumer, &shared);
        assert_eq!(data, [0.0; 480]);
        assert_eq!(shared.queued.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn speaking_again_drops_leftover_audio() {
        let router = Router::new().route("/audio/speech", post(|| async { Bytes::new() }));
        let (mut playback, mut consumer, shared) = playback_for(&serve(router).await);
        playback.producer.lock().unwrap().push_slice(&[0.5; 960]);
        shared.queued.store(960, Ordering::Release);
        let (tx, mut rx) = mpsc::unbounded_channel();

        playback.speak("Next answer", tx).unwrap();
        assert!(shared.flush.load(Ordering::Acquire));

        let mut data = [1.0; 480];
        fill_output(&mut data, 1, &mut consumer, &shared);
        assert_eq!(data, [0.0; 480]);

        assert_eq!(rx.recv().await, Some(PlaybackSignal::Started));
        assert_eq!(rx.recv().await, Some(PlaybackSignal::Completed));
    }
}
