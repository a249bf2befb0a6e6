use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MODEL_URL: &str = "http://localhost:11434";

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Could not reach Ollama at {url}: {message}")]
    Connection { url: String, message: String },

    #[error("Can't find Ollama model: {0}")]
    ModelNotFound(String),

    #[error("Ollama API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response from Ollama: {0}")]
    InvalidResponse(String),
}

impl InferenceError {
    /// A command that usually resolves the error.
    pub fn hint(&self) -> Option<String> {
        match self {
            InferenceError::Connection { .. } => {
                Some("Make sure Ollama is running: ollama serve".to_string())
            }
            InferenceError::ModelNotFound(model) => {
                Some(format!("Pull the model first: ollama pull {}", model))
            }
            _ => None,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            InferenceError::Connection { .. } => true,
            InferenceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// One prompt sent to the model.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// `"json"` or a JSON Schema the output must follow.
    pub format: Option<Value>,
    pub temperature: f32,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;
    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}

#[derive(Debug, Clone, Serialize)]
struct ModelOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a Value>,
    options: ModelOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    model: String,
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub done_reason: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub response_time: Duration,
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    pub model: String,
    num_ctx: Option<u32>,
    max_retries: u32,
    retry_delay: Duration,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: u64, max_retries: u32) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            num_ctx: None,
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_num_ctx(mut self, num_ctx: Option<u32>) -> Self {
        self.num_ctx = num_ctx;
        self
    }

    /// Base delay of the exponential backoff between retries.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn check_health(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch models")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama returned error: {}", response.status());
        }

        let tags: TagsResponse = response.json().await
            .context("Failed to parse models response")?;

        Ok(tags.models)
    }

    pub async fn has_model(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        let wanted = if model.contains(':') {
            model.to_string()
        } else {
            format!("{}:latest", model)
        };
        Ok(models.iter().any(|m| m.name == model || m.name == wanted))
    }

    /// Sends one request, retrying transient failures up to `max_retries` times.
    pub async fn generate(&self, request: &InferenceRequest) -> Result<LlmResponse, InferenceError> {
        let mut retry = 0;
        loop {
            match self.generate_once(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.backoff_delay(retry);
                    warn!(
                        "Ollama request failed (retry {}/{}): {}. Retrying in {:?}",
                        retry, self.max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `retry_delay * 2^(retry - 1)`, saturating.
    fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }

    async fn generate_once(&self, request: &InferenceRequest) -> Result<LlmResponse, InferenceError> {
        let start_time = Instant::now();
        let url = format!("{}/api/generate", self.base_url);

        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            stream: false,
            format: request.format.as_ref(),
            options: ModelOptions {
                temperature: request.temperature,
                num_ctx: self.num_ctx,
            },
        };

        debug!("Sending request to Ollama ({} prompt bytes)", request.prompt.len());

        let response = self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Connection {
                url: self.base_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(InferenceError::ModelNotFound(self.model.clone()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let completion: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        Ok(LlmResponse {
            content: completion.response,
            model: completion.model,
            done_reason: completion.done_reason,
            prompt_tokens: completion.prompt_eval_count,
            completion_tokens: completion.eval_count,
            response_time: start_time.elapsed(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let response = self.generate(request).await?;
        debug!(
            "Ollama answered in {:?} ({:?} completion tokens, reason {:?})",
            response.response_time, response.completion_tokens, response.done_reason
        );
        Ok(response.content)
    }
}
