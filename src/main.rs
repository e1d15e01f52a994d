//! mcp-bridge: connects a language model to MCP tool servers, either as an
//! HTTP service or as an interactive terminal chat.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use mcp_bridge::{init_tracing, run_chat, AnthropicClient, AppConfig, Bridge, LogFormat, Result};

#[derive(Parser)]
#[command(name = "mcp-bridge", version, about = "Tool-augmented chat over MCP servers")]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API.
    #[cfg(feature = "server")]
    Serve,
    /// Chat with one tool server from the terminal.
    Chat {
        /// Path to the tool server script (.py or .js by default).
        server_script: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
    }
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "mcp-bridge exited with an error");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let cfg = AppConfig::load(args.config.as_deref())?;
    let model = Arc::new(AnthropicClient::from_config(&cfg.model)?);
    let bridge = Bridge::from_config(model, &cfg);

    match args.command {
        #[cfg(feature = "server")]
        Command::Serve => {
            let addr = format!("{}:{}", cfg.server.host, cfg.server.port)
                .parse::<SocketAddr>()
                .map_err(|err| {
                    mcp_bridge::BridgeError::Configuration(format!("invalid listen address: {err}"))
                })?;
            mcp_bridge::BridgeServer::new(Arc::new(bridge), cfg.security.allowed_origins.clone())
                .serve(addr)
                .await
        }
        Command::Chat { server_script } => {
            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            run_chat(&bridge, &server_script, stdin, &mut stdout).await
        }
    }
}
