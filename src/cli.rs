use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::bridge::Bridge;
use crate::error::Result;
use crate::llm::LanguageModel;

const QUIT: &str = "quit";

/// Interactive loop against one tool server. Reads queries line by line from
/// `input` until `quit` or end of input; a failed query is reported and the
/// loop keeps going. Sessions are closed before returning.
pub async fn run_chat<M, R, W>(
    bridge: &Bridge<M>,
    server_script: &str,
    input: R,
    output: &mut W,
) -> Result<()>
where
    M: LanguageModel,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = chat_loop(bridge, server_script, input, output).await;
    bridge.shutdown().await;
    outcome
}

async fn chat_loop<M, R, W>(
    bridge: &Bridge<M>,
    server_script: &str,
    input: R,
    output: &mut W,
) -> Result<()>
where
    M: LanguageModel,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let tools = bridge.connect(server_script).await?;
    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    output
        .write_all(format!("Connected to server with tools: {names:?}\n").as_bytes())
        .await?;
    output
        .write_all(b"MCP client started! Type your queries or 'quit' to exit.\n")
        .await?;

    let mut lines = input.lines();
    loop {
        output.write_all(b"\nQuery: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case(QUIT) {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let reply = match bridge.handle_query(query, server_script).await {
            Ok(answer) => format!("\n{answer}\n"),
            Err(err) => {
                warn!(error = %err, "query failed in chat session");
                format!("\nError: {err}\n")
            }
        };
        output.write_all(reply.as_bytes()).await?;
    }
    output.flush().await?;
    Ok(())
}
