use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tool `{tool}` execution failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("language model error: {0}")]
    ModelApi(String),

    #[error("orchestration stopped after {round_trips} tool round trips")]
    OrchestrationLimit { round_trips: usize, partial: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Text accumulated before the failure, when the error carries any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Self::OrchestrationLimit { partial, .. } => Some(partial.as_str()),
            _ => None,
        }
    }
}
