//! MCP (Model Context Protocol) client side of a tool-server connection.
//!
//! A tool server is a subprocess speaking newline-delimited JSON-RPC 2.0 over
//! its standard streams. [`McpSession`] owns one such connection: it performs
//! the `initialize` handshake, lists tools and invokes them, and tears the
//! subprocess down on [`ToolSession::close`].
//!
//! # Example
//! ```rust,ignore
//! use mcp_bridge::{McpSession, ServerLauncher, SessionTimeouts, ToolSession};
//!
//! let session = McpSession::open("server/github.py", &ServerLauncher::default(), SessionTimeouts::default()).await?;
//! let tools = session.list_tools().await?;
//! session.close().await?;
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::tool::Tool;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// MCP Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC request or notification. Notifications carry no id.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A request; the transport assigns the id when sending.
    pub fn call(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(0),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// Any JSON-RPC message read from the server. Server-initiated requests and
/// notifications carry a `method` and are skipped by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// MCP Tool definition from a server
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object"})
}

impl From<McpToolDefinition> for Tool {
    fn from(def: McpToolDefinition) -> Self {
        Tool {
            name: def.name,
            description: def.description.unwrap_or_default(),
            input_schema: def.input_schema,
        }
    }
}

/// MCP list_tools response
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

/// MCP call_tool result content
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
}

/// MCP call_tool result. `is_error` marks a failure of the tool's own logic,
/// which is still a successful protocol exchange.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Text content joined by newlines; non-text items become placeholders.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => text.clone(),
                ContentItem::Image { .. } => "[image]".to_string(),
                ContentItem::Resource { resource } => format!("[Resource: {resource}]"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Content blocks in the shape the model API accepts inside a tool result.
    pub fn to_model_content(&self) -> Value {
        let blocks: Vec<Value> = self
            .content
            .iter()
            .map(|item| match item {
                ContentItem::Text { text } => json!({"type": "text", "text": text}),
                ContentItem::Image { data, mime_type } => json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": mime_type.clone().unwrap_or_else(|| "image/png".to_string()),
                        "data": data,
                    }
                }),
                ContentItem::Resource { resource } => {
                    json!({"type": "text", "text": format!("[Resource: {resource}]")})
                }
            })
            .collect();
        Value::Array(blocks)
    }
}

/// MCP server capabilities
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// MCP initialize result
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP server info
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Transport layer for MCP communication
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the response with the same id.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; nothing is read back.
    async fn notify(&self, notification: JsonRpcRequest) -> Result<()>;

    /// Close the transport. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio Transport (Async via tokio::process)
// ─────────────────────────────────────────────────────────────────────────────

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // set while an exchange is in progress; still set afterwards means the
    // exchange was dropped midway and the stream can no longer be trusted
    in_flight: bool,
}

impl StdioPipes {
    fn ensure_in_sync(&self) -> Result<()> {
        if self.in_flight {
            return Err(BridgeError::Transport(
                "MCP session stream is out of sync after an interrupted request".into(),
            ));
        }
        Ok(())
    }

    async fn write_line(&mut self, payload: &str) -> Result<()> {
        self.stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to write to MCP server: {e}")))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to write newline: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to flush: {e}")))
    }
}

/// Transport that communicates with an MCP server via stdio
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    // held across the write and the matching read, one exchange at a time
    pipes: Mutex<Option<StdioPipes>>,
    request_id: AtomicU64,
}

impl StdioTransport {
    /// Launch `command args..` with piped stdin/stdout.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::Transport(format!("failed to spawn MCP server `{command}`: {e}"))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(BridgeError::Transport(
                    "MCP server stdio not available".into(),
                ));
            }
        };
        debug!(command, ?args, pid = child.id(), "spawned MCP server");

        Ok(Self {
            child: Mutex::new(Some(child)),
            pipes: Mutex::new(Some(StdioPipes {
                stdin,
                stdout: BufReader::new(stdout),
                in_flight: false,
            })),
            request_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        request.id = Some(id);
        let request_json = serde_json::to_string(&request)
            .map_err(|e| BridgeError::Transport(format!("failed to serialize request: {e}")))?;

        let mut guard = self.pipes.lock().await;
        let pipes = guard
            .as_mut()
            .ok_or_else(|| BridgeError::Transport("MCP session is closed".into()))?;

        pipes.ensure_in_sync()?;

        debug!(id, method = %request.method, "MCP request");
        pipes.in_flight = true;
        pipes.write_line(&request_json).await?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = pipes.stdout.read_line(&mut line).await.map_err(|e| {
                BridgeError::Transport(format!("failed to read from MCP server: {e}"))
            })?;
            if read == 0 {
                return Err(BridgeError::Transport(
                    "MCP server closed its output stream".into(),
                ));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_str(trimmed).map_err(|e| {
                BridgeError::Transport(format!("malformed message from MCP server: {e}"))
            })?;
            if response.method.is_none() && response.id == Some(id) {
                pipes.in_flight = false;
                return Ok(response);
            }
            debug!(
                expected = id,
                got = ?response.id,
                method = ?response.method,
                "skipping unrelated MCP message"
            );
        }
    }

    async fn notify(&self, mut notification: JsonRpcRequest) -> Result<()> {
        notification.id = None;
        let payload = serde_json::to_string(&notification).map_err(|e| {
            BridgeError::Transport(format!("failed to serialize notification: {e}"))
        })?;

        let mut guard = self.pipes.lock().await;
        let pipes = guard
            .as_mut()
            .ok_or_else(|| BridgeError::Transport("MCP session is closed".into()))?;
        pipes.ensure_in_sync()?;
        pipes.in_flight = true;
        pipes.write_line(&payload).await?;
        pipes.in_flight = false;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // dropping the pipes closes the server's stdin
        self.pipes.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill MCP server");
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server launching
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a server script's file extension to the interpreter that runs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerLauncher {
    interpreters: BTreeMap<String, String>,
}

impl Default for ServerLauncher {
    fn default() -> Self {
        Self::new(default_interpreters())
    }
}

pub fn default_interpreters() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("py".to_string(), "python".to_string()),
        ("js".to_string(), "node".to_string()),
    ])
}

impl ServerLauncher {
    pub fn new(interpreters: BTreeMap<String, String>) -> Self {
        Self { interpreters }
    }

    pub fn with_interpreter(
        mut self,
        extension: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        self.interpreters.insert(extension.into(), command.into());
        self
    }

    /// Resolve `identifier` to `(program, args)` without launching anything.
    pub fn command_for(&self, identifier: &str) -> Result<(String, Vec<String>)> {
        let extension = Path::new(identifier)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        let program = self.interpreters.get(extension).ok_or_else(|| {
            let known: Vec<String> = self.interpreters.keys().map(|ext| format!(".{ext}")).collect();
            BridgeError::Configuration(format!(
                "server script `{identifier}` must be one of: {}",
                known.join(", ")
            ))
        })?;
        Ok((program.clone(), vec![identifier.to_string()]))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimeouts {
    pub handshake: Duration,
    pub call: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            call: Duration::from_secs(30),
        }
    }
}

/// Operations the orchestrator needs from a live tool-server connection.
#[async_trait]
pub trait ToolSession: Send + Sync {
    fn identifier(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<Tool>>;

    async fn invoke(&self, name: &str, arguments: Value) -> Result<CallToolResult>;

    async fn close(&self) -> Result<()>;
}

/// One initialized connection to one MCP server.
pub struct McpSession<T: McpTransport> {
    identifier: String,
    transport: T,
    server_info: ServerInfo,
    capabilities: ServerCapabilities,
    timeouts: SessionTimeouts,
    catalog: StdMutex<Option<Vec<Tool>>>,
}

impl<T: McpTransport> std::fmt::Debug for McpSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("identifier", &self.identifier)
            .field("server_info", &self.server_info)
            .field("capabilities", &self.capabilities)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl McpSession<StdioTransport> {
    /// Launch the server for `identifier` and complete the handshake.
    pub async fn open(
        identifier: &str,
        launcher: &ServerLauncher,
        timeouts: SessionTimeouts,
    ) -> Result<Self> {
        let (program, args) = launcher.command_for(identifier)?;
        let transport = StdioTransport::spawn(&program, &args)?;
        Self::connect(identifier, transport, timeouts).await
    }
}

impl<T: McpTransport> McpSession<T> {
    /// Run the handshake over an already established transport. The transport
    /// is closed if the handshake fails.
    pub async fn connect(identifier: &str, transport: T, timeouts: SessionTimeouts) -> Result<Self> {
        let outcome = tokio::time::timeout(timeouts.handshake, handshake(&transport)).await;
        let init = match outcome {
            Ok(Ok(init)) => init,
            Ok(Err(err)) => {
                let _ = transport.close().await;
                return Err(err);
            }
            Err(_) => {
                let _ = transport.close().await;
                return Err(BridgeError::Transport(format!(
                    "handshake with `{identifier}` did not complete within {:?}",
                    timeouts.handshake
                )));
            }
        };

        info!(
            identifier,
            server = %init.server_info.name,
            protocol = %init.protocol_version,
            "connected to MCP server"
        );

        Ok(Self {
            identifier: identifier.to_string(),
            transport,
            server_info: init.server_info,
            capabilities: init.capabilities,
            timeouts,
            catalog: StdMutex::new(None),
        })
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Tools from the most recent successful listing.
    pub fn cached_tools(&self) -> Option<Vec<Tool>> {
        self.catalog.lock().ok().and_then(|guard| guard.clone())
    }

    /// Send one request bounded by the call timeout; `on_timeout` builds the
    /// error reported when it elapses.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        on_timeout: impl FnOnce(String) -> BridgeError,
    ) -> Result<JsonRpcResponse> {
        match tokio::time::timeout(
            self.timeouts.call,
            self.transport.send(JsonRpcRequest::call(method, params)),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => Err(on_timeout(format!(
                "`{method}` timed out after {:?}",
                self.timeouts.call
            ))),
        }
    }
}

async fn handshake<T: McpTransport>(transport: &T) -> Result<InitializeResult> {
    let response = transport
        .send(JsonRpcRequest::call(
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        ))
        .await?;

    if let Some(error) = response.error {
        return Err(BridgeError::Transport(format!(
            "initialize failed: {}",
            error.message
        )));
    }

    let result: InitializeResult = serde_json::from_value(response.result.unwrap_or_default())
        .map_err(|e| BridgeError::Transport(format!("failed to parse initialize result: {e}")))?;

    transport
        .notify(JsonRpcRequest::notification("notifications/initialized", None))
        .await?;

    Ok(result)
}

#[async_trait]
impl<T: McpTransport> ToolSession for McpSession<T> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let response = self
                .request("tools/list", params, BridgeError::Transport)
                .await?;
            if let Some(error) = response.error {
                return Err(BridgeError::Transport(format!(
                    "tools/list failed: {}",
                    error.message
                )));
            }

            let page: ListToolsResult =
                serde_json::from_value(response.result.unwrap_or_default()).map_err(|e| {
                    BridgeError::Transport(format!("failed to parse tools/list result: {e}"))
                })?;
            tools.extend(page.tools.into_iter().map(Tool::from));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(identifier = %self.identifier, count = tools.len(), "listed tools");
        if let Ok(mut cached) = self.catalog.lock() {
            *cached = Some(tools.clone());
        }
        Ok(tools)
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let response = self
            .request("tools/call", Some(params), |message| {
                BridgeError::tool(name, message)
            })
            .await?;

        if let Some(error) = response.error {
            return Err(BridgeError::tool(name, error.message));
        }

        let result: CallToolResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| BridgeError::Transport(format!("failed to parse tools/call result: {e}")))?;
        debug!(tool = name, is_error = result.is_error, "tool call completed");
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        debug!(identifier = %self.identifier, "closing MCP session");
        self.transport.close().await
    }
}
