//! Tool-augmented chat over the Model Context Protocol.
//!
//! The crate provides:
//! - An MCP client session over a subprocess's stdio (`McpSession`, `StdioTransport`).
//! - A registry keeping at most one live session per server script (`SessionRegistry`).
//! - A language model abstraction and an Anthropic Messages API client (`LanguageModel`).
//! - An `Orchestrator` that loops between the model and tool calls until a final answer.
//! - A `Bridge` that serves queries over HTTP (`BridgeServer`) or an interactive terminal (`run_chat`).

mod bridge;
mod cli;
mod config;
mod error;
mod format;
mod llm;
mod mcp;
mod message;
mod orchestrator;
mod registry;
#[cfg(feature = "server")]
mod server;
mod telemetry;
mod tool;

pub use bridge::Bridge;
pub use cli::run_chat;
pub use config::{
    AppConfig, ModelConfig, OrchestrationConfig, SecurityConfig, ServerConfig, ToolsConfig,
};
pub use error::{BridgeError, Result};
pub use format::format_tool_result;
pub use llm::{
    AnthropicClient, LanguageModel, ModelRequest, ModelResponse, ScriptedModel, ANTHROPIC_VERSION,
};
pub use mcp::{
    default_interpreters, CallToolResult, ContentItem, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpSession, McpToolDefinition, McpTransport,
    ServerCapabilities, ServerInfo, ServerLauncher, SessionTimeouts, StdioTransport, ToolSession,
    PROTOCOL_VERSION,
};
pub use message::{ContentBlock, Message, Role};
pub use orchestrator::{LoopState, Orchestrator, OrchestratorSettings, Transcript};
pub use registry::{SessionConnector, SessionRegistry, StdioConnector};
#[cfg(feature = "server")]
pub use server::{BridgeServer, QueryRequest, QueryResponse};
pub use telemetry::{init_tracing, LogFormat};
pub use tool::{to_declarations, Tool, ToolDeclaration};
