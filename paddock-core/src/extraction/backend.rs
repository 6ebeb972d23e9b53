use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{ExtractionProvider, ExtractionSection};

use super::error::{ExtractionError, ExtractionResult};
use super::prompt::ExtractionPrompt;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Credential held in memory only. Never printed.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn from_env(variable: &str) -> ExtractionResult<Self> {
        match std::env::var(variable) {
            Ok(value) if !value.trim().is_empty() => Ok(Secret(value.trim().to_string())),
            _ => Err(ExtractionError::MissingCredential(variable.to_string())),
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// A structured-extraction provider.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    /// Returns the model's raw text answer.
    async fn complete(&self, prompt: &ExtractionPrompt) -> ExtractionResult<String>;
}

fn http_client(settings: &ExtractionSection) -> ExtractionResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.timeout())
        .build()
        .map_err(|err| ExtractionError::BackendUnavailable(format!("http client: {err}")))
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    let mut short: String = trimmed.chars().take(300).collect();
    if short.len() < trimmed.len() {
        short.push('…');
    }
    short
}

async fn send(request: reqwest::RequestBuilder) -> ExtractionResult<Value> {
    let response = request.send().await.map_err(|err| {
        if err.is_timeout() {
            ExtractionError::BackendUnavailable("request timed out".to_string())
        } else {
            ExtractionError::BackendUnavailable(err.without_url().to_string())
        }
    })?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ExtractionError::BackendUnavailable(err.without_url().to_string()))?;
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(ExtractionError::BackendUnavailable(format!(
            "status {}: {}",
            status.as_u16(),
            snippet(&body)
        )));
    }
    if !status.is_success() {
        return Err(ExtractionError::BackendRejected {
            status: status.as_u16(),
            message: snippet(&body),
        });
    }
    serde_json::from_str(&body).map_err(|_| ExtractionError::UnparsableResponse { raw: body })
}

/// Google Gemini `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    credential: Secret,
}

impl GeminiBackend {
    pub fn new(settings: &ExtractionSection, credential: Secret) -> ExtractionResult<Self> {
        Ok(Self {
            client: http_client(settings)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: settings.model.clone(),
            credential,
        })
    }
}

#[async_trait]
impl ExtractionBackend for GeminiBackend {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &ExtractionPrompt) -> ExtractionResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = json!({
            "systemInstruction": {"parts": [{"text": prompt.system}]},
            "contents": [{"role": "user", "parts": [{"text": prompt.user}]}],
            "generationConfig": {
                "temperature": prompt.temperature,
                "maxOutputTokens": prompt.max_output_tokens,
                "responseMimeType": "application/json"
            }
        });
        debug!(model = %self.model, "Calling Gemini");
        let envelope = send(
            self.client
                .post(url)
                .header("x-goog-api-key", self.credential.expose())
                .json(&body),
        )
        .await?;
        let text = envelope["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ExtractionError::UnparsableResponse {
                raw: envelope.to_string(),
            });
        }
        Ok(text)
    }
}

/// Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    credential: Secret,
}

impl AnthropicBackend {
    pub fn new(settings: &ExtractionSection, credential: Secret) -> ExtractionResult<Self> {
        Ok(Self {
            client: http_client(settings)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            model: settings.model.clone(),
            credential,
        })
    }
}

#[async_trait]
impl ExtractionBackend for AnthropicBackend {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &ExtractionPrompt) -> ExtractionResult<String> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "max_tokens": prompt.max_output_tokens,
            "temperature": prompt.temperature,
            "system": prompt.system,
            "messages": [{"role": "user", "content": prompt.user}]
        });
        debug!(model = %self.model, "Calling Anthropic");
        let envelope = send(
            self.client
                .post(url)
                .header("x-api-key", self.credential.expose())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )
        .await?;
        let text = envelope["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block["type"] == "text")
                    .filter_map(|block| block["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ExtractionError::UnparsableResponse {
                raw: envelope.to_string(),
            });
        }
        Ok(text)
    }
}

/// Builds the configured provider with an explicit credential.
pub fn backend_with_credential(
    settings: &ExtractionSection,
    credential: Secret,
) -> ExtractionResult<Arc<dyn ExtractionBackend>> {
    Ok(match settings.provider {
        ExtractionProvider::Gemini => Arc::new(GeminiBackend::new(settings, credential)?),
        ExtractionProvider::Anthropic => Arc::new(AnthropicBackend::new(settings, credential)?),
    })
}

/// Builds the configured provider, reading the credential from the
/// environment variable named in `credential_env`.
pub fn backend_from_config(
    settings: &ExtractionSection,
) -> ExtractionResult<Arc<dyn ExtractionBackend>> {
    let credential = Secret::from_env(&settings.credential_env)?;
    backend_with_credential(settings, credential)
}
