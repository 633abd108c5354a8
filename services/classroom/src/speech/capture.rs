use super::SpeechApi;
use crate::config::INPUT_CHUNK_SIZE;
use anyhow::Context;
use classroom_core::error::SpeechError;
use classroom_core::speech::{SpeechCapture, TranscriptStream};
use classroom_native_utils::audio::{downmix, encode_wav};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Recording state shared with the input stream callback.
#[derive(Debug, Default)]
pub struct CaptureShared {
    recording: AtomicBool,
    samples: Mutex<Vec<f32>>,
}

impl CaptureShared {
    fn take_samples(&self) -> Vec<f32> {
        self.samples
            .lock()
            .map(|mut samples| std::mem::take(&mut *samples))
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<f32> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }
}

/// Input stream callback body: keeps mono samples while recording.
pub fn record_input(data: &[f32], channels: usize, shared: &CaptureShared) {
    if !shared.recording.load(Ordering::Acquire) {
        return;
    }
    let audio = downmix(data, channels);
    match shared.samples.lock() {
        Ok(mut samples) => samples.extend(audio),
        Err(_) => tracing::warn!("Dropping microphone samples: capture buffer poisoned"),
    }
}

async fn transcribe(api: &SpeechApi, samples: &[f32], sample_rate: u32) -> Result<String, SpeechError> {
    let wav = encode_wav(samples, sample_rate).map_err(|e| SpeechError::CaptureError(e.to_string()))?;
    api.transcribe(wav).await
}

/// Speech-to-text from a microphone: records while listening, then uploads
/// the recording for transcription when stopped.
pub struct MicrophoneCapture {
    api: SpeechApi,
    sample_rate: u32,
    shared: Arc<CaptureShared>,
    interim_interval: Option<Duration>,
    interim_task: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    pub fn new(
        api: SpeechApi,
        sample_rate: u32,
        shared: Arc<CaptureShared>,
        interim_interval: Option<Duration>,
    ) -> Self {
        Self {
            api,
            sample_rate,
            shared,
            interim_interval,
            interim_task: None,
        }
    }

    fn stop_interim(&mut self) {
        if let Some(task) = self.interim_task.take() {
            task.abort();
        }
    }

    /// Re-transcribes the recording so far every `interval` and yields each
    /// result.
    fn spawn_interim(&mut self, interval: Duration) -> TranscriptStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let api = self.api.clone();
        let shared = self.shared.clone();
        let sample_rate = self.sample_rate;
        self.interim_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let samples = shared.snapshot();
                if samples.is_empty() {
                    continue;
                }
                match transcribe(&api, &samples, sample_rate).await {
                    Ok(text) if !text.is_empty() => {
                        if tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Interim transcription failed: {e}"),
                }
            }
        }));
        futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|text| (text, rx)) })
            .boxed()
    }
}

impl SpeechCapture for MicrophoneCapture {
    fn is_supported(&self) -> bool {
        true
    }

    fn start(&mut self) -> Result<TranscriptStream, SpeechError> {
        self.stop_interim();
        self.shared.take_samples();
        self.shared.recording.store(true, Ordering::Release);
        tracing::debug!("Microphone recording started");

        Ok(match self.interim_interval {
            Some(interval) => self.spawn_interim(interval),
            None => futures::stream::empty().boxed(),
        })
    }

    fn stop(&mut self) -> BoxFuture<'static, Result<String, SpeechError>> {
        self.stop_interim();
        let was_recording = self.shared.recording.swap(false, Ordering::AcqRel);
        let samples = self.shared.take_samples();
        if !was_recording || samples.is_empty() {
            return Box::pin(async { Ok(String::new()) });
        }

        tracing::debug!(samples = samples.len(), "Microphone recording stopped");
        let api = self.api.clone();
        let sample_rate = self.sample_rate;
        Box::pin(async move { transcribe(&api, &samples, sample_rate).await })
    }

    fn abort(&mut self) {
        self.stop_interim();
        self.shared.recording.store(false, Ordering::Release);
        self.shared.take_samples();
    }

    fn is_listening(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }
}

/// Opens the input device and starts its stream. Nothing is kept until the
/// capture is started.
///
/// The returned stream must stay alive for as long as the capture is used.
pub fn open_input(
    device_name: Option<&str>,
    api: SpeechApi,
    interim_interval: Option<Duration>,
) -> anyhow::Result<(cpal::Stream, MicrophoneCapture)> {
    let input = classroom_native_utils::device::get_or_default_input(device_name)
        .context("Failed to get audio input device")?;
    tracing::info!("Using input device: {:?}", input.name()?);
    for config in input.supported_input_configs()? {
        tracing::debug!("Supported input config: {:?}", config);
    }

    let input_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    // Default channels and sample rate, but with a fixed buffer size.
    let input_config = StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = input_config.channels as usize;
    tracing::info!("Input stream config: {:?}", &input_config);

    let shared = Arc::new(CaptureShared::default());
    let callback_shared = shared.clone();
    let stream = input.build_input_stream(
        &input_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            record_input(data, channel_count, &callback_shared)
        },
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((
        stream,
        MicrophoneCapture::new(api, input_config.sample_rate.0, shared, interim_interval),
    ))
}
