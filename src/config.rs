use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::mcp::{default_interpreters, ServerLauncher, SessionTimeouts};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key: None,
            endpoint: default_endpoint(),
            timeout_secs: default_model_timeout(),
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".into()
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".into()
}

fn default_model_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// File extension (without the dot) to interpreter command.
    #[serde(default = "default_interpreters")]
    pub launchers: BTreeMap<String, String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            call_timeout_secs: default_call_timeout(),
            launchers: default_interpreters(),
        }
    }
}

impl ToolsConfig {
    pub fn launcher(&self) -> ServerLauncher {
        ServerLauncher::new(self.launchers.clone())
    }

    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            handshake: Duration::from_secs(self.handshake_timeout_secs),
            call: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_call_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationConfig {
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_round_trips: default_max_round_trips(),
        }
    }
}

fn default_max_round_trips() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            BridgeError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|err| {
            BridgeError::Configuration(format!("failed to parse configuration: {err}"))
        })
    }

    /// Defaults or the given file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        if let Ok(host) = env::var("BRIDGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parsed_var("BRIDGE_PORT") {
            self.server.port = port;
        }
        if let Ok(origins) = env::var("BRIDGE_ALLOWED_ORIGINS") {
            self.security.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(model) = env::var("BRIDGE_MODEL") {
            self.model.model = model;
        }
        if let Some(max_tokens) = parsed_var("BRIDGE_MAX_TOKENS") {
            self.model.max_tokens = max_tokens;
        }
        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(key) = env::var("BRIDGE_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var("BRIDGE_MODEL_ENDPOINT") {
            self.model.endpoint = endpoint;
        }
        if let Some(secs) = parsed_var("BRIDGE_HANDSHAKE_TIMEOUT") {
            self.tools.handshake_timeout_secs = secs;
        }
        if let Some(secs) = parsed_var("BRIDGE_CALL_TIMEOUT") {
            self.tools.call_timeout_secs = secs;
        }
        if let Some(rounds) = parsed_var("BRIDGE_MAX_ROUND_TRIPS") {
            self.orchestration.max_round_trips = rounds;
        }
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}
