//! Audio-device speech for the terminal host.
//!
//! Both capabilities talk to the OpenAI audio endpoints through [`SpeechApi`]
//! and to the sound card through `cpal`. The `cpal` streams are not `Send`,
//! so `main` builds and owns them while the capability structs only hold the
//! shared buffers the stream callbacks read and write.

pub mod capture;
pub mod playback;

use crate::config::Config;
use classroom_core::error::SpeechError;
use classroom_core::responder::parse_error_message;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for `/audio/speech` and `/audio/transcriptions`.
#[derive(Clone)]
pub struct SpeechApi {
    client: Client,
    base_url: String,
    api_key: Arc<SecretString>,
    speech_model: String,
    voice: String,
    transcription_model: String,
    language: String,
    /// Bounds getting a response. Speech bodies are read as fast as they are
    /// played, so reading them is bounded per chunk instead.
    timeout: Duration,
}

impl SpeechApi {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: Arc::new(SecretString::from(
                config.openai_api_key.expose_secret().to_string(),
            )),
            speech_model: config.speech_model.clone(),
            voice: config.speech_voice.clone(),
            transcription_model: config.transcription_model.clone(),
            language: config.transcription_language.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Requests raw 24 kHz mono PCM16 for `text`. The body is left unread so
    /// the caller can play it while it streams in.
    pub async fn synthesize(&self, text: &str) -> Result<reqwest::Response, SpeechError> {
        let body = SpeechRequest {
            model: &self.speech_model,
            input: text,
            voice: &self.voice,
            response_format: "pcm",
        };
        let request = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| SpeechError::PlaybackError("speech request timed out".into()))?
            .map_err(|e| SpeechError::PlaybackError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SpeechError::PlaybackError(format!(
                "{status}: {}",
                parse_error_message(&text)
            )));
        }
        Ok(response)
    }

    /// Uploads a WAV recording and returns its transcript.
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String, SpeechError> {
        let part = Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::CaptureError(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.transcription_model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let request = async {
            let response = self
                .client
                .post(format!("{}/audio/transcriptions", self.base_url))
                .bearer_auth(self.api_key.expose_secret())
                .multipart(form)
                .send()
                .await?;
            let status = response.status();
            Ok::<_, reqwest::Error>((status, response.text().await?))
        };
        let (status, text) = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| SpeechError::CaptureError("transcription request timed out".into()))?
            .map_err(|e| SpeechError::CaptureError(e.to_string()))?;
        if !status.is_success() {
            return Err(SpeechError::CaptureError(format!(
                "{status}: {}",
                parse_error_message(&text)
            )));
        }

        let transcription: TranscriptionResponse = serde_json::from_str(&text)
            .map_err(|e| SpeechError::CaptureError(format!("malformed transcription: {e}")))?;
        Ok(transcription.text.trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::{Body, Bytes};
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    pub(crate) async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub(crate) fn api_for(base_url: &str) -> SpeechApi {
        api_with_timeout(base_url, 30)
    }

    pub(crate) fn api_with_timeout(base_url: &str, timeout_secs: u64) -> SpeechApi {
        let config = Config::from_lookup(|name| match name {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "OPENAI_BASE_URL" => Some(base_url.to_string()),
            "CLASSROOM_REQUEST_TIMEOUT_SECS" => Some(timeout_secs.to_string()),
            _ => None,
        })
        .unwrap();
        SpeechApi::new(&config).unwrap()
    }

    #[tokio::test]
    async fn synthesize_requests_raw_pcm() {
        let router = Router::new().route(
            "/audio/speech",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["response_format"], "pcm");
                assert_eq!(body["voice"], "alloy");
                assert_eq!(body["model"], "tts-1");
                assert_eq!(body["input"], "Hello class");
                Bytes::from_static(&[0x00, 0x40, 0x00, 0xc0])
            }),
        );
        let api = api_for(&serve(router).await);

        let response = api.synthesize("Hello class").await.unwrap();
        assert_eq!(response.bytes().await.unwrap().as_ref(), &[0x00u8, 0x40, 0x00, 0xc0]);
    }

    #[tokio::test]
    async fn synthesize_failure_is_a_playback_error() {
        let router = Router::new().route(
            "/audio/speech",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": { "message": "Rate limit reached" } })),
                )
            }),
        );
        let api = api_for(&serve(router).await);

        match api.synthesize("Hello").await {
            Err(SpeechError::PlaybackError(message)) => {
                assert!(message.contains("Rate limit reached"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn speech_body_may_outlast_the_timeout() {
        // Five chunks, half a second apart, against a one second timeout.
        let router = Router::new().route(
            "/audio/speech",
            post(|| async {
                let chunks = futures::stream::unfold(0, |sent| async move {
                    if sent == 5 {
                        return None;
                    }
                    if sent > 0 {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                    Some((Ok::<_, std::io::Error>(Bytes::from(vec![0u8; 960])), sent + 1))
                });
                Body::from_stream(chunks)
            }),
        );
        let api = api_with_timeout(&serve(router).await, 1);

        let mut response = api.synthesize("A long answer").await.unwrap();
        let mut received = 0;
        while let Some(chunk) = response.chunk().await.unwrap() {
            received += chunk.len();
        }
        assert_eq!(received, 5 * 960);
    }

    #[tokio::test]
    async fn unanswered_speech_request_times_out() {
        let router = Router::new().route(
            "/audio/speech",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Bytes::new()
            }),
        );
        let api = api_with_timeout(&serve(router).await, 1);

        match api.synthesize("Hello").await {
            Err(SpeechError::PlaybackError(message)) => assert!(message.contains("timed out")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn transcribe_uploads_the_recording() {
        let router = Router::new().route(
            "/audio/transcriptions",
            post(|mut multipart: Multipart| async move {
                let mut fields = Vec::new();
                while let Some(field) = multipart.next_field().await.unwrap() {
                    let name = field.name().unwrap_or_default().to_string();
                    let data = field.bytes().await.unwrap();
                    fields.push((name, data));
                }
                let field = |name: &str| {
                    fields
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, data)| data.clone())
                        .unwrap()
                };
                assert_eq!(field("file").as_ref(), b"RIFF-audio");
                assert_eq!(field("model").as_ref(), b"whisper-1");
                assert_eq!(field("language").as_ref(), b"en");
                Json(json!({ "text": " What is a limit? " }))
            }),
        );
        let api = api_for(&serve(router).await);

        let transcript = api.transcribe(b"RIFF-audio".to_vec()).await.unwrap();
        assert_eq!(transcript, "What is a limit?");
    }

    #[tokio::test]
    async fn malformed_transcription_is_a_capture_error() {
        let router = Router::new().route(
            "/audio/transcriptions",
            post(|| async { "not json" }),
        );
        let api = api_for(&serve(router).await);

        assert!(matches!(
            api.transcribe(vec![1, 2, 3]).await,
            Err(SpeechError::CaptureError(_))
        ));
    }
}
