//! Language model abstraction and the Anthropic Messages API client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{BridgeError, Result};
use crate::message::{ContentBlock, Message};
use crate::tool::ToolDeclaration;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One call to the model: the full history plus the tool declarations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
}

/// The model's turn, as ordered content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ModelResponse {
    pub fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            stop_reason: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            stop_reason: Some("end_turn".to_string()),
        }
    }
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn create_message(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> BridgeError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return BridgeError::ModelApi(format!("{provider} rate limit exceeded: {body}"));
    }
    let body: String = body.chars().take(500).collect();
    BridgeError::ModelApi(format!("{provider} request failed with {status}: {body}"))
}

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::build(
            api_key.into(),
            "https://api.anthropic.com/v1/messages".to_string(),
            Duration::from_secs(60),
        )
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            BridgeError::Configuration(
                "missing Anthropic API key (set ANTHROPIC_API_KEY or [model].api_key)".into(),
            )
        })?;
        Self::build(api_key, cfg.endpoint.clone(), cfg.timeout())
    }

    fn build(api_key: String, endpoint: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(timeout)
                .build()
                .map_err(|err| BridgeError::ModelApi(format!("http client error: {err}")))?,
            api_key,
            endpoint,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn create_message(&self, request: &ModelRequest) -> Result<ModelResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Anthropic request"
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|err| BridgeError::ModelApi(format!("Anthropic request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "anthropic"));
        }

        let parsed: ModelResponse = resp.json().await.map_err(|err| {
            BridgeError::ModelApi(format!("Anthropic response parse error: {err}"))
        })?;
        debug!(
            blocks = parsed.content.len(),
            stop_reason = ?parsed.stop_reason,
            "Anthropic response"
        );
        Ok(parsed)
    }
}

/// A deterministic model used for tests and demos. Replays queued responses
/// in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn create_message(&self, request: &ModelRequest) -> Result<ModelResponse> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| BridgeError::ModelApi("scripted model poisoned".into()))?;
        queue.pop_front().ok_or_else(|| {
            BridgeError::ModelApi("ScriptedModel ran out of scripted responses".into())
        })
    }
}
