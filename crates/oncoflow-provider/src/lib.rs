pub mod gemini;
pub mod types;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gemini::GeminiClient;
pub use types::*;

/// Text-in, text-out access to a completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError>;

    /// Fails with [`InferenceError::Configuration`] when [`complete`](Self::complete)
    /// could not possibly succeed. Makes no request.
    fn ensure_configured(&self) -> Result<(), InferenceError> {
        Ok(())
    }
}

// ============================================================
// Provider Configuration
// ============================================================

fn default_model() -> String {
    gemini::DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    gemini::GEMINI_API_BASE.to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    120
}

/// Completion-service settings as they appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Whether a usable (non-empty, non-placeholder) credential is present.
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| gemini::check_credential(key).is_ok())
    }
}

// ============================================================
// Stub service
// ============================================================

/// Completion service that replays queued responses, for tests and dry runs.
#[derive(Default)]
pub struct StubCompletion {
    responses: Mutex<VecDeque<Result<String, InferenceError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicUsize,
}

impl StubCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn with_error(self, err: InferenceError) -> Self {
        self.push(Err(err));
        self
    }

    pub fn push(&self, response: Result<String, InferenceError>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|reqs| reqs.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionService for StubCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request);
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| Ok(String::new()))
    }
}
