use thiserror::Error;

/// Message used when the service rejects a request without explaining why.
pub const GENERIC_SERVICE_ERROR: &str = "completion service returned an error without a message";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionOptions {
    /// Ask the service to answer with a JSON document.
    pub structured_output: bool,
}

impl CompletionOptions {
    pub fn structured() -> Self {
        Self {
            structured_output: true,
        }
    }

    pub fn plain_text() -> Self {
        Self {
            structured_output: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub options: CompletionOptions,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, system: Option<String>, options: CompletionOptions) -> Self {
        Self {
            prompt: prompt.into(),
            system,
            options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("completion service credential is not configured: {0}")]
    Configuration(String),
    #[error("could not reach the completion service: {0}")]
    Transport(String),
    #[error("completion service error ({status}): {message}")]
    Service { status: u16, message: String },
}

impl InferenceError {
    /// Transport failures, throttling and server-side faults may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Configuration(_) => false,
            InferenceError::Transport(_) => true,
            InferenceError::Service { status, .. } => matches!(status, 429 | 500..=599),
        }
    }
}
