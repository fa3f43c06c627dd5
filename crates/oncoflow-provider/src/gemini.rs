//! Google Gemini completion client
//!
//! https://ai.google.dev/api/generate-content

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    CompletionRequest, CompletionService, InferenceError, ProviderConfig, GENERIC_SERVICE_ERROR,
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const PLACEHOLDER_MARKERS: &[&str] = &["PEGAR_TU_CLAVE", "YOUR_API_KEY", "<api-key>", "${"];

/// Reject empty keys and the placeholders shipped in sample configs.
pub(crate) fn check_credential(key: &str) -> Result<&str, InferenceError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(InferenceError::Configuration("api key is empty".into()));
    }
    if PLACEHOLDER_MARKERS.iter().any(|marker| key.contains(marker)) {
        return Err(InferenceError::Configuration(
            "api key is still a placeholder".into(),
        ));
    }
    Ok(key)
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self::from_config(&ProviderConfig {
            api_key,
            ..ProviderConfig::default()
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn credential(&self) -> Result<&str, InferenceError> {
        match self.api_key.as_deref() {
            Some(key) => check_credential(key),
            None => Err(InferenceError::Configuration("no api key configured".into())),
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(request.prompt.clone()),
                }],
            }],
            system_instruction: request.system.as_ref().map(|s| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(s.clone()),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                response_mime_type: request
                    .options
                    .structured_output
                    .then(|| "application/json".to_string()),
            },
        }
    }
}

#[async_trait]
impl CompletionService for GeminiClient {
    fn ensure_configured(&self) -> Result<(), InferenceError> {
        self.credential().map(|_| ())
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, InferenceError> {
        let api_key = self.credential()?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );

        let payload = self.build_request(&request);
        tracing::debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            structured = request.options.structured_output,
            "sending completion request"
        );

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    e.without_url().to_string()
                };
                InferenceError::Transport(reason)
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| InferenceError::Transport(e.without_url().to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "completion service rejected request");
            return Err(InferenceError::Service {
                status: status.as_u16(),
                message: service_error_message(&body),
            });
        }

        Ok(first_candidate_text(&body))
    }
}

/// Provider-supplied `error.message`, or the generic fallback.
fn service_error_message(body: &str) -> String {
    serde_json::from_str::<GeminiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| GENERIC_SERVICE_ERROR.to_string())
}

/// Text of the first part of the first candidate; empty when the response has none.
fn first_candidate_text(body: &str) -> String {
    let parsed = match serde_json::from_str::<GeminiResponse>(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("unreadable completion body, treating as empty: {e}");
            return String::new();
        }
    };

    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .unwrap_or_default()
}

// ============================================================
// Gemini API Types
// ============================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionOptions;

    #[test]
    fn build_request_basic() {
        let client = GeminiClient::new(Some("test-key".into()));
        let req = CompletionRequest::new(
            "Analiza",
            Some("Eres un experto".into()),
            CompletionOptions::structured(),
        );
        let api_req = client.build_request(&req);
        let json = serde_json::to_value(&api_req).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Analiza");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Eres un experto");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert!((json["generationConfig"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn build_request_plain_text_omits_mime_hint() {
        let client = GeminiClient::new(Some("test-key".into()));
        let req = CompletionRequest::new("hola", None, CompletionOptions::plain_text());
        let json = serde_json::to_value(client.build_request(&req)).unwrap();

        assert!(json.get("systemInstruction").is_none());
        assert!(json["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn first_candidate_text_takes_first_part_only() {
        let body = serde_json::json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "uno"}, {"text": "dos"}]}},
                {"content": {"role": "model", "parts": [{"text": "tres"}]}}
            ]
        })
        .to_string();
        assert_eq!(first_candidate_text(&body), "uno");
    }

    #[test]
    fn first_candidate_text_empty_when_structurally_absent() {
        assert_eq!(first_candidate_text(r#"{"candidates": []}"#), "");
        assert_eq!(first_candidate_text(r#"{}"#), "");
        assert_eq!(first_candidate_text(r#"{"candidates": [{}]}"#), "");
        assert_eq!(
            first_candidate_text(r#"{"candidates": [{"content": {"parts": []}}]}"#),
            ""
        );
        assert_eq!(first_candidate_text("not json"), "");
    }

    #[test]
    fn service_error_message_prefers_provider_text() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid."}}"#;
        assert_eq!(service_error_message(body), "API key not valid.");
        assert_eq!(service_error_message(r#"{"error": {}}"#), GENERIC_SERVICE_ERROR);
        assert_eq!(service_error_message("<html>502</html>"), GENERIC_SERVICE_ERROR);
        assert_eq!(
            service_error_message(r#"{"error": {"message": "  "}}"#),
            GENERIC_SERVICE_ERROR
        );
    }

    #[test]
    fn credential_rejects_placeholders() {
        assert!(check_credential("").is_err());
        assert!(check_credential("   ").is_err());
        assert!(check_credential("PEGAR_TU_CLAVE").is_err());
        assert!(check_credential("${GEMINI_API_KEY}").is_err());
        assert_eq!(check_credential(" abc ").unwrap(), "abc");
    }

    #[test]
    fn ensure_configured_follows_the_credential() {
        assert!(matches!(
            GeminiClient::new(None).ensure_configured(),
            Err(InferenceError::Configuration(_))
        ));
        assert!(GeminiClient::new(Some("PEGAR_TU_CLAVE".into()))
            .ensure_configured()
            .is_err());
        assert!(GeminiClient::new(Some("AIza-key".into()))
            .ensure_configured()
            .is_ok());
    }
}
