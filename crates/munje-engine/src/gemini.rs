use std::time::Duration;

use anyhow::{bail, Context, Result};
use munje_contracts::models::GenerationParams;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use thiserror::Error;

use crate::provider::{InvokeRequest, TextProvider, VisionProvider};
use crate::{non_empty_env, truncate_text};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);
const ERROR_BODY_MAX_CHARS: usize = 1024;
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY not set")]
    MissingApiKey,
}

/// Everything needed to reach the upstream API. Built once per process and
/// shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GeminiSettings {
    pub fn from_env() -> Self {
        Self {
            api_key: Self::api_key_from_env(),
            api_base: Self::api_base_from_env(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_key_from_env() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    pub fn api_base_from_env() -> String {
        non_empty_env("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiProvider {
    /// Fails before any network activity when no credential is configured.
    ///
    /// The blocking client must be created and dropped off the async runtime,
    /// so servers build one per request on the blocking pool.
    pub fn new(settings: &GeminiSettings) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(Self {
            api_key: api_key.to_string(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            timeout: settings.timeout,
            http: HttpClient::new(),
        })
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        endpoint_for_model(&self.api_base, model)
    }
}

impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String> {
        self.generate_content(request.model, &build_payload(request))
    }
}

impl TextProvider for GeminiProvider {
    fn prompt_text(&self, model: &str, prompt: &str) -> Result<String> {
        self.generate_content(model, &build_text_payload(prompt))
    }
}

impl GeminiProvider {
    /// The key travels in a header and reqwest errors are stripped of their
    /// URL, so diagnostics can be shown to clients without leaking it.
    fn generate_content(&self, model: &str, payload: &Value) -> Result<String> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| anyhow::Error::new(err.without_url()))
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let body = response_json_or_error("Gemini", response)?;
        extract_text(&body)
    }
}

pub fn endpoint_for_model(api_base: &str, model: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };
    format!("{}/{}:generateContent", api_base.trim_end_matches('/'), model_path)
}

pub fn build_payload(request: &InvokeRequest<'_>) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": request.prompt },
                {
                    "inlineData": {
                        "mimeType": request.image.mime_type,
                        "data": request.image.base64(),
                    }
                }
            ]
        }],
        "generationConfig": generation_config(request.params),
    })
}

pub fn build_text_payload(prompt: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
    })
}

fn generation_config(params: &GenerationParams) -> Value {
    json!({
        "temperature": params.temperature,
        "topK": params.top_k,
        "topP": params.top_p,
        "maxOutputTokens": params.max_output_tokens,
    })
}

/// Concatenates the text parts of the first candidate.
pub fn extract_text(body: &Value) -> Result<String> {
    let parts = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    if !text.trim().is_empty() {
        return Ok(text);
    }

    if let Some(reason) = body
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        bail!("Gemini blocked the prompt ({reason})");
    }
    let finish_reason = body
        .pointer("/candidates/0/finishReason")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    bail!("Gemini response contained no text (finishReason: {finish_reason})")
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| anyhow::Error::new(err.without_url()))
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, ERROR_BODY_MAX_CHARS)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
