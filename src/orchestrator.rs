//! The tool-augmented conversation loop.
//!
//! One query runs as:
//!
//! ```text
//! Idle -> AwaitingModel -> (text only)  -> Done
//!                       -> (tool use)   -> ExecutingTool -> AwaitingModel
//! ```
//!
//! bounded by a maximum number of tool round trips.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{BridgeError, Result};
use crate::format::format_tool_result;
use crate::llm::{LanguageModel, ModelRequest, ModelResponse};
use crate::mcp::ToolSession;
use crate::message::{ContentBlock, Message};
use crate::tool::to_declarations;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ExecutingTool,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub model: String,
    pub max_tokens: u32,
    pub max_round_trips: usize,
    pub model_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            model: cfg.model.model.clone(),
            max_tokens: cfg.model.max_tokens,
            max_round_trips: cfg.orchestration.max_round_trips,
            model_timeout: cfg.model.timeout(),
        }
    }
}

/// Everything one query produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Messages in the order they were sent to the model, ending with the
    /// model's final turn.
    pub history: Vec<Message>,
    /// Text blocks from every model turn, in order.
    pub narration: Vec<String>,
    pub round_trips: usize,
    pub tool_calls: usize,
}

impl Transcript {
    pub fn narration_text(&self) -> String {
        self.narration.join("\n")
    }
}

pub struct Orchestrator<M: LanguageModel> {
    model: Arc<M>,
    settings: OrchestratorSettings,
}

impl<M: LanguageModel> Orchestrator<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            model,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_round_trips(mut self, max_round_trips: usize) -> Self {
        self.settings.max_round_trips = max_round_trips;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run `query` to completion and return the formatted narration.
    pub async fn answer(&self, session: &dyn ToolSession, query: &str) -> Result<String> {
        let transcript = self.run(session, query).await?;
        Ok(format_tool_result(&transcript.narration_text()))
    }

    /// Run `query` against `session` until the model stops requesting tools.
    ///
    /// Exceeding the round-trip cap fails with
    /// [`BridgeError::OrchestrationLimit`], carrying the formatted narration
    /// gathered so far.
    pub async fn run(&self, session: &dyn ToolSession, query: &str) -> Result<Transcript> {
        debug!(state = ?LoopState::Idle, identifier = session.identifier(), "starting query");
        let tools = session.list_tools().await?;

        let mut request = ModelRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            messages: vec![Message::user(query)],
            tools: to_declarations(&tools),
        };
        let mut narration: Vec<String> = Vec::new();
        let mut round_trips = 0;
        let mut tool_calls = 0;

        loop {
            debug!(state = ?LoopState::AwaitingModel, round_trips, "calling model");
            let response = self.call_model(&request).await?;
            let turn = Message::assistant(response.content);
            narration.extend(turn.texts().map(String::from));

            let uses: Vec<(String, String, Value)> = turn
                .tool_uses()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if uses.is_empty() {
                request.messages.push(turn);
                info!(state = ?LoopState::Done, round_trips, tool_calls, "query complete");
                return Ok(Transcript {
                    history: request.messages,
                    narration,
                    round_trips,
                    tool_calls,
                });
            }

            if round_trips >= self.settings.max_round_trips {
                warn!(
                    state = ?LoopState::Done,
                    round_trips,
                    requested = uses.len(),
                    "round-trip limit reached"
                );
                return Err(BridgeError::OrchestrationLimit {
                    round_trips,
                    partial: format_tool_result(&narration.join("\n")),
                });
            }

            let mut results = Vec::with_capacity(uses.len());
            for (id, name, input) in uses {
                debug!(state = ?LoopState::ExecutingTool, tool = %name, id = %id, "invoking tool");
                results.push(execute_tool(session, id, &name, input).await?);
                tool_calls += 1;
            }

            request.messages.push(turn);
            request.messages.push(Message::tool_results(results));
            round_trips += 1;
        }
    }

    async fn call_model(&self, request: &ModelRequest) -> Result<ModelResponse> {
        tokio::time::timeout(self.settings.model_timeout, self.model.create_message(request))
            .await
            .map_err(|_| {
                BridgeError::ModelApi(format!(
                    "model call timed out after {:?}",
                    self.settings.model_timeout
                ))
            })?
    }
}

/// Invoke one tool and wrap the outcome as a result block for `id`.
/// Execution failures become error results the model can react to.
async fn execute_tool(
    session: &dyn ToolSession,
    id: String,
    name: &str,
    input: Value,
) -> Result<ContentBlock> {
    match session.invoke(name, input).await {
        Ok(output) => Ok(ContentBlock::tool_result(
            id,
            output.to_model_content(),
            output.is_error,
        )),
        Err(BridgeError::ToolExecution { message, .. }) => {
            warn!(tool = name, error = %message, "tool execution failed");
            Ok(ContentBlock::tool_result(id, json!(format!("Error: {message}")), true))
        }
        Err(err) => Err(err),
    }
}
