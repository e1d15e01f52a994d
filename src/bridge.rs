use std::sync::Arc;

use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::Result;
use crate::llm::LanguageModel;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::registry::SessionRegistry;
use crate::tool::Tool;

/// Query entry point shared by the HTTP front end and the CLI: resolves the
/// tool-server session, runs the conversation and formats the answer.
pub struct Bridge<M: LanguageModel> {
    registry: SessionRegistry,
    orchestrator: Orchestrator<M>,
}

impl<M: LanguageModel> Bridge<M> {
    pub fn new(registry: SessionRegistry, orchestrator: Orchestrator<M>) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }

    pub fn from_config(model: Arc<M>, cfg: &AppConfig) -> Self {
        Self::new(
            SessionRegistry::stdio(cfg.tools.launcher(), cfg.tools.timeouts()),
            Orchestrator::new(model).with_settings(OrchestratorSettings::from_config(cfg)),
        )
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Open (or reuse) the session for `server_script` and list its tools.
    pub async fn connect(&self, server_script: &str) -> Result<Vec<Tool>> {
        let session = self.registry.get_or_open(server_script).await?;
        session.list_tools().await
    }

    pub async fn handle_query(&self, query: &str, server_script: &str) -> Result<String> {
        info!(server_script, query_len = query.len(), "received query");
        let session = self.registry.get_or_open(server_script).await?;
        match self.orchestrator.answer(session.as_ref(), query).await {
            Ok(answer) => Ok(answer),
            Err(err) => {
                error!(server_script, error = %err, "query failed");
                Err(err)
            }
        }
    }

    pub async fn shutdown(&self) {
        let live = self.registry.identifiers().await;
        info!(sessions = live.len(), "shutting down tool server sessions");
        self.registry.shutdown().await;
    }
}
