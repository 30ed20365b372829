//! LLM Backend implementations
//!
//! Backends are single-shot: one HTTP request, one response, no retry.
//! Timeout budgeting and the single retry live in [`crate::OracleClient`].
//! Both backends ask the server for JSON-only output.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::prompt::Message;
use crate::LlmError;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/ID
    pub model: String,
    /// API endpoint
    pub endpoint: String,
    /// API key (OpenAI-compatible servers only)
    pub api_key: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    pub temperature: f32,
    /// Hard ceiling on one HTTP request; the oracle client enforces tighter budgets
    pub request_timeout: Duration,
    /// Ask the server to constrain output to a JSON object
    pub json_mode: bool,
    /// Keep the model loaded between calls (Ollama only)
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "mistral:7b-instruct".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            max_tokens: 1024,
            temperature: 0.3,
            request_timeout: Duration::from_secs(60),
            json_mode: true,
            keep_alive: "10m".to_string(),
        }
    }
}

/// LLM generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    /// Tokens generated, when the server reports it
    pub tokens: usize,
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
}

/// LLM Backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a response
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError>;

    /// Check if the server answers
    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}

/// Map a non-success HTTP status to an error. 5xx is transient, 4xx is not.
fn status_error(status: StatusCode, body: String) -> LlmError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        LlmError::Network(format!("Server error {}: {}", status, body))
    } else if status == StatusCode::NOT_FOUND {
        LlmError::ModelNotFound(body)
    } else {
        LlmError::Api(format!("HTTP {}: {}", status, body))
    }
}

fn build_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Ollama backend using `/api/chat`
#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: LlmConfig,
}

impl OllamaBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = build_client(config.request_timeout)?;
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn chat_request(&self, messages: &[Message]) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(|m| m.into()).collect(),
            stream: false,
            format: self.config.json_mode.then(|| "json".to_string()),
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature),
                num_predict: Some(self.config.max_tokens as i32),
            }),
            keep_alive: Some(self.config.keep_alive.clone()),
        }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.chat_request(messages);

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let result: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(GenerationResult {
            text: result.message.content,
            tokens: result.eval_count.unwrap_or(0) as usize,
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: if result.done_reason.as_deref() == Some("length") {
                FinishReason::Length
            } else {
                FinishReason::Stop
            },
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
}

// =============================================================================

/// OpenAI-compatible backend using `/chat/completions`
///
/// Works with OpenAI, vLLM and local servers exposing the same API.
pub struct OpenAIBackend {
    config: LlmConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let is_local = config.endpoint.starts_with("http://localhost")
            || config.endpoint.starts_with("http://127.0.0.1");
        if config.api_key.as_deref().map_or(true, str::is_empty) && !is_local {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = build_client(config.request_timeout)?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        use reqwest::header::HeaderValue;

        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(ref key) = self.config.api_key {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }

        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        headers
    }

    fn chat_request(&self, messages: &[Message]) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            response_format: self.config.json_mode.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(&self, messages: &[Message]) -> Result<GenerationResult, LlmError> {
        let start = Instant::now();
        let request = self.chat_request(messages);

        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        Ok(GenerationResult {
            text: choice.message.content.unwrap_or_default(),
            tokens: response.usage.map(|u| u.completion_tokens).unwrap_or(0),
            total_time_ms: start.elapsed().as_millis() as u64,
            finish_reason: match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    completion_tokens: usize,
}
