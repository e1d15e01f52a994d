#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mcp_bridge::{
    Bridge, BridgeError, ContentBlock, McpSession, ModelResponse, Orchestrator, ScriptedModel,
    ServerLauncher, SessionRegistry, SessionTimeouts, ToolSession,
};
use serde_json::json;
use tempfile::TempDir;

// Minimal MCP server: one `echo` tool, a log notification ahead of each call
// result, a `slow` tool that answers after two seconds, and a JSON-RPC error
// for any other tool name.
const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-echo","version":"0.1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"slow"'*)
      sleep 2
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"late"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"echo"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"echoing"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"Unknown tool"}}\n' "$id" ;;
  esac
done
"#;

fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn sh_launcher() -> ServerLauncher {
    ServerLauncher::default().with_interpreter("sh", "sh")
}

fn short_timeouts() -> SessionTimeouts {
    SessionTimeouts {
        handshake: Duration::from_secs(5),
        call: Duration::from_secs(5),
    }
}

async fn open(path: &Path, timeouts: SessionTimeouts) -> mcp_bridge::Result<McpSession<mcp_bridge::StdioTransport>> {
    McpSession::open(path.to_str().unwrap(), &sh_launcher(), timeouts).await
}

#[tokio::test]
async fn handshake_list_and_call_over_stdio() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "echo_server.sh", ECHO_SERVER);

    let session = open(&script, short_timeouts()).await.unwrap();
    assert_eq!(session.server_info().name, "sh-echo");

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].input_schema["properties"]["text"]["type"], "string");

    let result = session.invoke("echo", json!({"text": "hi"})).await.unwrap();
    assert!(!result.is_error);
    assert_eq!(result.joined_text(), "echoed");

    session.close().await.unwrap();
}

#[tokio::test]
async fn unknown_tool_is_execution_error_and_session_survives() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "echo_server.sh", ECHO_SERVER);
    let session = open(&script, short_timeouts()).await.unwrap();

    let err = session.invoke("missing", json!({})).await.unwrap_err();
    match err {
        BridgeError::ToolExecution { tool, message } => {
            assert_eq!(tool, "missing");
            assert_eq!(message, "Unknown tool");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let again = session.invoke("echo", json!({})).await.unwrap();
    assert_eq!(again.joined_text(), "echoed");
    session.close().await.unwrap();
}

#[tokio::test]
async fn timed_out_call_leaves_session_failing_cleanly() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "echo_server.sh", ECHO_SERVER);
    let timeouts = SessionTimeouts {
        handshake: Duration::from_secs(5),
        call: Duration::from_millis(300),
    };
    let session = open(&script, timeouts).await.unwrap();

    let err = session.invoke("slow", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::ToolExecution { .. }));

    let err = session.invoke("echo", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
    session.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_further_calls() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "echo_server.sh", ECHO_SERVER);
    let session = open(&script, short_timeouts()).await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();

    let err = session.list_tools().await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
}

#[tokio::test]
async fn silent_server_times_out_during_handshake() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "silent.sh", "cat > /dev/null\n");
    let timeouts = SessionTimeouts {
        handshake: Duration::from_millis(300),
        call: Duration::from_secs(5),
    };

    let err = open(&script, timeouts).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
}

#[tokio::test]
async fn exiting_server_fails_handshake() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "exits.sh", "exit 0\n");

    let err = open(&script, short_timeouts()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Transport(_)));
}

#[tokio::test]
async fn bridge_answers_query_through_subprocess() {
    let dir = TempDir::new().unwrap();
    let script = write_script(&dir, "echo_server.sh", ECHO_SERVER);
    let identifier = script.to_str().unwrap().to_string();

    let model = ScriptedModel::new(vec![
        ModelResponse::new(vec![
            ContentBlock::text("Calling echo."),
            ContentBlock::tool_use("toolu_1", "echo", json!({"text": "hi"})),
        ]),
        ModelResponse::text("The server said: echoed"),
    ]);
    let bridge = Bridge::new(
        SessionRegistry::stdio(sh_launcher(), short_timeouts()),
        Orchestrator::new(Arc::clone(&model)),
    );

    let answer = bridge.handle_query("say hi", &identifier).await.unwrap();
    assert_eq!(answer, "Calling echo.\n\nThe server said: echoed");

    let requests = model.requests();
    let tool_turn = &requests[1].messages[2];
    assert_eq!(
        tool_turn.content,
        vec![ContentBlock::tool_result(
            "toolu_1",
            json!([{"type": "text", "text": "echoed"}]),
            false
        )]
    );

    bridge.shutdown().await;
    assert!(bridge.registry().identifiers().await.is_empty());
}
