use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::parser::{parse_response, ParsedResponse};
use super::types::FileReviewResult;
use crate::config::ModelConfig;

/// Errors from a single model call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model API returned HTTP {0}")]
    Status(u16),

    #[error("model API request failed: {0}")]
    Transport(String),

    #[error("unexpected model API response: {0}")]
    InvalidResponse(String),

    #[error("model API key not configured")]
    MissingApiKey,
}

impl ModelError {
    /// Transient failures are worth one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Timeout | ModelError::Transport(_) => true,
            ModelError::Status(code) => *code == 429 || *code >= 500,
            ModelError::InvalidResponse(_) | ModelError::MissingApiKey => false,
        }
    }

    /// Short reason code suitable for a published summary.
    pub fn reason(&self) -> String {
        match self {
            ModelError::Timeout => "timeout".to_string(),
            ModelError::Status(code) => format!("http_{code}"),
            ModelError::Transport(_) => "connection_error".to_string(),
            ModelError::InvalidResponse(_) => "invalid_response".to_string(),
            ModelError::MissingApiKey => "model_not_configured".to_string(),
        }
    }
}

/// Text generation backend.
#[async_trait]
pub trait ReviewModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

const SYSTEM_MESSAGE: &str = "You are a strict code-review agent. You verify code changes against \
the supplied ticket requirements and requirement documents, report only issues that matter, \
give accurate line numbers, and always answer with the requested JSON object.";

/// OpenAI-compatible chat-completions backend.
pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAiModel {
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = config.api_key.clone().ok_or(ModelError::MissingApiKey)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ReviewModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Status(status.as_u16()));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".to_string()))
    }
}

/// A file that could not be reviewed.
#[derive(Debug, Error)]
#[error("review of {path} failed after {attempts} attempt(s): {source}")]
pub struct ReviewFailure {
    pub path: String,
    pub attempts: u32,
    #[source]
    pub source: ModelError,
}

impl ReviewFailure {
    pub fn reason(&self) -> String {
        self.source.reason()
    }
}

/// Calls the model for one file with a timeout and at most one retry.
#[derive(Clone)]
pub struct ReviewClient {
    model: Arc<dyn ReviewModel>,
    timeout: Duration,
    backoff: Duration,
}

impl ReviewClient {
    pub fn new(model: Arc<dyn ReviewModel>, config: &ModelConfig) -> Self {
        Self {
            model,
            timeout: config.timeout(),
            backoff: config.retry_backoff(),
        }
    }

    async fn call(&self, prompt: &str) -> Result<String, ModelError> {
        match tokio::time::timeout(self.timeout, self.model.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Timeout),
        }
    }

    /// Review one file. Transient failures are retried once after the
    /// configured backoff; unparseable output degrades to a raw finding.
    #[instrument(skip(self, prompt), fields(prompt_chars = prompt.len()))]
    pub async fn review(
        &self,
        path: &str,
        prompt: &str,
    ) -> Result<FileReviewResult, ReviewFailure> {
        let raw = match self.call(prompt).await {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                warn!(
                    error = %e,
                    backoff_ms = self.backoff.as_millis() as u64,
                    "transient model failure, retrying once"
                );
                tokio::time::sleep(self.backoff).await;
                self.call(prompt).await.map_err(|source| ReviewFailure {
                    path: path.to_string(),
                    attempts: 2,
                    source,
                })?
            }
            Err(source) => {
                return Err(ReviewFailure {
                    path: path.to_string(),
                    attempts: 1,
                    source,
                })
            }
        };

        let parsed = parse_response(&raw);
        if let ParsedResponse::RawFallback(_) = &parsed {
            warn!("model response did not match the expected structure, keeping raw text");
        }
        let result = parsed.into_result(path);
        debug!(findings = result.findings.len(), "file reviewed");
        Ok(result)
    }
}
