use std::time::Duration;

/// Failures reported by the host speech capabilities.
///
/// The `*Unsupported` variants are detected once when a classroom opens and
/// permanently disable the matching affordance. The other two are transient:
/// the coordinator resets to a safe state and surfaces a notice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("voice input is not supported on this host")]
    CaptureUnsupported,
    #[error("voice input failed: {0}")]
    CaptureError(String),
    #[error("speech output is not supported on this host")]
    PlaybackUnsupported,
    #[error("speech output failed: {0}")]
    PlaybackError(String),
}

/// Failures of the remote chat-completion call. None of them are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("no API credential is configured")]
    MissingCredential,
    #[error("the teacher did not answer within {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("service responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Rejected user submissions. Never surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("submission is empty")]
    EmptySubmission,
}

/// Trims a submission and rejects it when nothing is left.
pub fn validate_submission(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptySubmission);
    }
    Ok(trimmed)
}
