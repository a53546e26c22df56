use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::error::LlmError;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Client for the Gemini `generateContent` API.
///
/// Holds the shared HTTP client and the server-configured key; callers may
/// supply a per-request key override, which wins when present.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.gemini_api_key.clone(), config.gemini_model.clone())
    }

    fn resolve_key<'a>(&'a self, override_key: Option<&'a str>) -> Result<&'a str, LlmError> {
        override_key
            .filter(|key| !key.trim().is_empty())
            .or(self.api_key.as_deref())
            .ok_or(LlmError::MissingKey)
    }

    /// Executes one generation call and returns the candidate text verbatim.
    /// JSON output is requested through the response MIME type; safety
    /// filtering runs at the moderate (`BLOCK_MEDIUM_AND_ABOVE`) threshold.
    pub async fn generate(
        &self,
        prompt: &str,
        temperature: f64,
        api_key: Option<&str>,
    ) -> Result<String, LlmError> {
        self.request(prompt, temperature, api_key, true).await
    }

    /// Like `generate`, but for plain-text output (rubric generation).
    pub async fn generate_text(
        &self,
        prompt: &str,
        temperature: f64,
        api_key: Option<&str>,
    ) -> Result<String, LlmError> {
        self.request(prompt, temperature, api_key, false).await
    }

    async fn request(
        &self,
        prompt: &str,
        temperature: f64,
        api_key: Option<&str>,
        json_output: bool,
    ) -> Result<String, LlmError> {
        let key = self.resolve_key(api_key)?;
        let url = format!(
            "{GEMINI_API_BASE}/models/{}:generateContent?key={}",
            self.model, key
        );

        let safety_settings: Vec<Value> = SAFETY_CATEGORIES
            .iter()
            .map(|category| {
                json!({
                    "category": category,
                    "threshold": "BLOCK_MEDIUM_AND_ABOVE",
                })
            })
            .collect();

        let mut generation_config = json!({ "temperature": temperature });
        if json_output {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let body = json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [{ "text": prompt }]
                }
            ],
            "generationConfig": generation_config,
            "safetySettings": safety_settings,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        parse_generate_response(status, &text)
    }

    /// Validates an API key by listing models and checking that at least one
    /// supports `generateContent`.
    pub async fn verify_key(&self, api_key: &str) -> Result<usize, LlmError> {
        let key = api_key.trim();
        if key.is_empty() {
            return Err(LlmError::MissingKey);
        }

        let url = format!("{GEMINI_API_BASE}/models?key={key}");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(LlmError::Api {
                status,
                message: preview(&text),
            });
        }

        let listing: ModelListing = serde_json::from_str(&text)
            .map_err(|err| LlmError::Malformed(format!("invalid model listing: {err}")))?;

        let usable = listing
            .models
            .iter()
            .filter(|model| {
                model
                    .supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .count();

        if usable == 0 {
            return Err(LlmError::Api {
                status,
                message: "API key is valid, but no generative models are available".to_string(),
            });
        }

        Ok(usable)
    }
}

/// Classifies one `generateContent` HTTP exchange into candidate text or a
/// typed failure. Pure so the classification rules stay unit-testable.
fn parse_generate_response(status: u16, body: &str) -> Result<String, LlmError> {
    if status == 429 {
        return Err(LlmError::RateLimited(preview(body)));
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            if (200..300).contains(&status) {
                return Err(LlmError::Malformed(format!(
                    "response body is not JSON: {err}"
                )));
            }
            return Err(LlmError::Api {
                status,
                message: preview(body),
            });
        }
    };

    if !(200..300).contains(&status) {
        let message = value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| preview(body));
        let status_name = value
            .pointer("/error/status")
            .and_then(Value::as_str)
            .unwrap_or("");
        if status_name == "RESOURCE_EXHAUSTED" {
            return Err(LlmError::RateLimited(message));
        }
        return Err(LlmError::Api { status, message });
    }

    if let Some(reason) = value
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(LlmError::ContentBlocked(reason.to_string()));
    }

    let candidate = value
        .pointer("/candidates/0")
        .ok_or(LlmError::EmptyResponse)?;

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        if reason == "SAFETY" || reason == "PROHIBITED_CONTENT" {
            return Err(LlmError::ContentBlocked(reason.to_string()));
        }
    }

    let text = candidate
        .pointer("/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or(LlmError::EmptyResponse)?;

    Ok(text.to_string())
}

fn preview(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() > MAX {
        format!("{}...", &body[..MAX])
    } else {
        body.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default, rename = "supportedGenerationMethods")]
    supported_generation_methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_body(text: &str) -> String {
        json!({
            "candidates": [
                {
                    "content": { "parts": [{ "text": text }] },
                    "finishReason": "STOP"
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn candidate_text_is_extracted() {
        let text = parse_generate_response(200, &candidate_body("{\"ok\":true}")).unwrap();
        assert_eq!(text, "{\"ok\":true}");
    }

    #[test]
    fn http_429_is_rate_limited() {
        let err = parse_generate_response(429, "slow down").unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn resource_exhausted_is_rate_limited() {
        let body = json!({
            "error": { "status": "RESOURCE_EXHAUSTED", "message": "quota exceeded" }
        })
        .to_string();
        let err = parse_generate_response(403, &body).unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
    }

    #[test]
    fn prompt_block_is_terminal() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } }).to_string();
        let err = parse_generate_response(200, &body).unwrap_err();
        assert!(matches!(err, LlmError::ContentBlocked(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn safety_finish_reason_is_terminal() {
        let body = json!({
            "candidates": [{ "finishReason": "SAFETY", "content": { "parts": [] } }]
        })
        .to_string();
        let err = parse_generate_response(200, &body).unwrap_err();
        assert!(matches!(err, LlmError::ContentBlocked(_)));
    }

    #[test]
    fn missing_candidates_is_an_empty_response() {
        let err = parse_generate_response(200, "{}").unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
        assert!(err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable_api_errors() {
        let body = json!({ "error": { "status": "INTERNAL", "message": "boom" } }).to_string();
        let err = parse_generate_response(500, &body).unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 500, .. }));
        assert!(err.is_retryable());

        let err = parse_generate_response(400, &body).unwrap_err();
        assert!(!err.is_retryable());
    }
}
