#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mcp_bridge::{
    BridgeError, CallToolResult, Result, SessionConnector, Tool, ToolSession,
};
use serde_json::{json, Value};

/// In-memory tool server answering a small fixed catalog.
pub struct EchoSession {
    identifier: String,
    pub invocations: Mutex<Vec<(String, Value)>>,
    pub closed: AtomicUsize,
}

impl EchoSession {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            invocations: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolSession for EchoSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(vec![
            Tool {
                name: "search_repositories".into(),
                description: "Search GitHub repositories".into(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }),
            },
            Tool {
                name: "get_file_contents".into(),
                description: "Read a file from a repository".into(),
                input_schema: json!({"type": "object"}),
            },
        ])
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.invocations
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        match name {
            "search_repositories" => Ok(CallToolResult::text(
                "tokio-rs/tokio: A runtime\n---\nserde-rs/serde: Serialization",
            )),
            "get_file_contents" => Ok(CallToolResult {
                is_error: true,
                ..CallToolResult::text("Error fetching file: 404")
            }),
            other => Err(BridgeError::ToolExecution {
                tool: other.to_string(),
                message: format!("Unknown tool: {other}"),
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out `EchoSession`s and remembers every one it opened.
#[derive(Default)]
pub struct EchoConnector {
    pub opened: Mutex<HashMap<String, Arc<EchoSession>>>,
    pub opens: AtomicUsize,
}

impl EchoConnector {
    pub fn session(&self, identifier: &str) -> Option<Arc<EchoSession>> {
        self.opened.lock().unwrap().get(identifier).cloned()
    }
}

#[async_trait]
impl SessionConnector for EchoConnector {
    async fn connect(&self, identifier: &str) -> Result<Arc<dyn ToolSession>> {
        if identifier.ends_with(".rb") {
            return Err(BridgeError::Configuration(
                "Server script must be a .py or .js file".into(),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(EchoSession::new(identifier));
        self.opened
            .lock()
            .unwrap()
            .insert(identifier.to_string(), Arc::clone(&session));
        Ok(session)
    }
}
