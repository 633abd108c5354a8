use crate::error::ServiceError;
use crate::turn::ConversationTurn;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const PERSONA_TEMPERATURE: f32 = 0.7;
pub const PERSONA_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces the teacher's next reply for a conversation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResponseClient: Send + Sync {
    async fn get_reply(&self, turns: &[ConversationTurn]) -> Result<String, ServiceError>;
}

/// Connection and completion settings for [`ChatCompletionsClient`].
pub struct ResponderConfig {
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

pub struct ResponderConfigBuilder {
    config: ResponderConfig,
}

impl ResponderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResponderConfig::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> ResponderConfig {
        self.config
    }
}

impl Default for ResponderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponderConfig {
    /// Defaults: OpenAI base URL, no credential, the persona completion
    /// settings and a 30 second timeout.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: SecretString::from(String::new()),
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: PERSONA_TEMPERATURE,
            max_tokens: PERSONA_MAX_TOKENS,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn builder() -> ResponderConfigBuilder {
        ResponderConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationTurn],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

const GENERIC_FAILURE: &str = "Failed to get a response from the teacher";

/// Extracts `choices[0].message.content` from a successful completion body.
pub fn parse_reply(body: &str) -> Result<String, ServiceError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| ServiceError::Malformed(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::Malformed("no reply content in response".to_string()))
}

/// Extracts `error.message` from a failure body, falling back to a generic text.
pub fn parse_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message)
        .unwrap_or_else(|| GENERIC_FAILURE.to_string())
}

/// `ResponseClient` backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsClient {
    client: Client,
    config: ResponderConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: ResponderConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    fn transport_error(&self, error: reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout(self.config.timeout)
        } else {
            ServiceError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl ResponseClient for ChatCompletionsClient {
    async fn get_reply(&self, turns: &[ConversationTurn]) -> Result<String, ServiceError> {
        let api_key = self.config.api_key.expose_secret();
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingCredential);
        }

        let body = ChatRequest {
            model: &self.config.model,
            messages: turns,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        tracing::debug!(
            model = %self.config.model,
            turns = turns.len(),
            "requesting teacher reply"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let message = parse_error_message(&text);
            tracing::warn!(status = status.as_u16(), %message, "chat completion failed");
            return Err(ServiceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        parse_reply(&text)
    }
}
