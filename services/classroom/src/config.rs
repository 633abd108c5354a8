//! Application Configuration Module
//!
//! Loads the classroom settings from environment variables (and a `.env` file
//! during local development) into a single struct handed to `main`.

use classroom_core::coordinator::SilentPolicy;
use classroom_core::responder::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL};
use classroom_core::speech::DEFAULT_WORDS_PER_MINUTE;
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

// --- Application Constants ---

/// The size of each audio chunk read from the microphone input stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// The size of each audio chunk for the audio output stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Seconds of resampled speech the output ring buffer holds.
pub const OUTPUT_BUFFER_SECS: usize = 10;

pub const DEFAULT_SPEECH_MODEL: &str = "tts-1";
pub const DEFAULT_SPEECH_VOICE: &str = "alloy";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const DEFAULT_TRANSCRIPTION_LANGUAGE: &str = "en";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub base_url: String,
    pub chat_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    pub transcription_model: String,
    pub transcription_language: String,
    pub request_timeout: Duration,
    pub history_window: Option<usize>,
    pub silent_policy: SilentPolicy,
    pub words_per_minute: u32,
    pub interim_interval: Option<Duration>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub persona_prompt_dir: Option<PathBuf>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Secret key for the OpenAI API. Required.
    // *   `OPENAI_BASE_URL`: (Optional) API base URL. Defaults to the public OpenAI endpoint.
    // *   `CHAT_MODEL`: (Optional) Model for teacher replies. Defaults to "gpt-4o-mini".
    // *   `SPEECH_MODEL` / `SPEECH_VOICE`: (Optional) Text-to-speech model and voice.
    // *   `TRANSCRIPTION_MODEL` / `TRANSCRIPTION_LANGUAGE`: (Optional) Speech-to-text settings.
    // *   `CLASSROOM_REQUEST_TIMEOUT_SECS`: (Optional) Timeout for every remote call. Defaults to 30.
    // *   `CLASSROOM_HISTORY_WINDOW`: (Optional) Recent turns sent with each question.
    // *   `CLASSROOM_SILENT_POLICY`: (Optional) "animate" or "skip" when no speech output exists.
    // *   `CLASSROOM_WORDS_PER_MINUTE`: (Optional) Pace of silent speech. Defaults to 160.
    // *   `CLASSROOM_INTERIM_SECS`: (Optional) Interval of live transcription while listening.
    // *   `INPUT_DEVICE` / `OUTPUT_DEVICE`: (Optional) Audio device names.
    // *   `PERSONA_PROMPT_DIR`: (Optional) Directory of persona template overrides.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let openai_api_key = var("OPENAI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let request_timeout = Duration::from_secs(parse_or(
            "CLASSROOM_REQUEST_TIMEOUT_SECS",
            var("CLASSROOM_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let interim_interval =
            parse_optional::<u64>("CLASSROOM_INTERIM_SECS", var("CLASSROOM_INTERIM_SECS"))?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs);

        Ok(Self {
            openai_api_key,
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            chat_model: var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            speech_model: var("SPEECH_MODEL").unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string()),
            speech_voice: var("SPEECH_VOICE").unwrap_or_else(|| DEFAULT_SPEECH_VOICE.to_string()),
            transcription_model: var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            transcription_language: var("TRANSCRIPTION_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_LANGUAGE.to_string()),
            request_timeout,
            history_window: parse_optional(
                "CLASSROOM_HISTORY_WINDOW",
                var("CLASSROOM_HISTORY_WINDOW"),
            )?,
            silent_policy: parse_or(
                "CLASSROOM_SILENT_POLICY",
                var("CLASSROOM_SILENT_POLICY"),
                SilentPolicy::default(),
            )?,
            words_per_minute: parse_or(
                "CLASSROOM_WORDS_PER_MINUTE",
                var("CLASSROOM_WORDS_PER_MINUTE"),
                DEFAULT_WORDS_PER_MINUTE,
            )?,
            interim_interval,
            input_device: var("INPUT_DEVICE"),
            output_device: var("OUTPUT_DEVICE"),
            persona_prompt_dir: var("PERSONA_PROMPT_DIR").map(PathBuf::from),
            log_level,
        })
    }
}

fn parse_optional<T: FromStr>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

fn parse_or<T: FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    Ok(parse_optional(name, value)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_key_is_set() {
        let config = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.openai_api_key.expose_secret(), "sk-test");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.speech_model, "tts-1");
        assert_eq!(config.speech_voice, "alloy");
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.transcription_language, "en");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.history_window, None);
        assert_eq!(config.silent_policy, SilentPolicy::Animate);
        assert_eq!(config.words_per_minute, 160);
        assert_eq!(config.interim_interval, None);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.persona_prompt_dir.is_none());
    }

    #[test]
    fn missing_key_is_an_error() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(_))));
        assert!(matches!(
            load(&[("OPENAI_API_KEY", "  ")]),
            Err(ConfigError::MissingVar(_))
        ));
    }

    #[test]
    fn classroom_settings_are_parsed() {
        let config = load(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("CLASSROOM_HISTORY_WINDOW", "6"),
            ("CLASSROOM_SILENT_POLICY", "skip"),
            ("CLASSROOM_REQUEST_TIMEOUT_SECS", "12"),
            ("CLASSROOM_INTERIM_SECS", "3"),
            ("OUTPUT_DEVICE", "USB Headset"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();
        assert_eq!(config.history_window, Some(6));
        assert_eq!(config.silent_policy, SilentPolicy::Skip);
        assert_eq!(config.request_timeout, Duration::from_secs(12));
        assert_eq!(config.interim_interval, Some(Duration::from_secs(3)));
        assert_eq!(config.output_device.as_deref(), Some("USB Headset"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = load(&[("OPENAI_API_KEY", "sk"), ("CLASSROOM_HISTORY_WINDOW", "lots")])
            .unwrap_err();
        assert!(err.to_string().contains("CLASSROOM_HISTORY_WINDOW"));

        let err = load(&[("OPENAI_API_KEY", "sk"), ("RUST_LOG", "chatty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }
}
