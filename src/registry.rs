//! Process-wide registry of live tool-server sessions, keyed by identifier.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::error::Result;
use crate::mcp::{McpSession, ServerLauncher, SessionTimeouts, ToolSession};

/// Opens a new session for an identifier.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, identifier: &str) -> Result<Arc<dyn ToolSession>>;
}

/// Launches server scripts as stdio subprocesses.
#[derive(Debug, Clone, Default)]
pub struct StdioConnector {
    launcher: ServerLauncher,
    timeouts: SessionTimeouts,
}

impl StdioConnector {
    pub fn new(launcher: ServerLauncher, timeouts: SessionTimeouts) -> Self {
        Self { launcher, timeouts }
    }
}

#[async_trait]
impl SessionConnector for StdioConnector {
    async fn connect(&self, identifier: &str) -> Result<Arc<dyn ToolSession>> {
        let session = McpSession::open(identifier, &self.launcher, self.timeouts).await?;
        Ok(Arc::new(session))
    }
}

// A slot whose open failed is removed once no other caller is waiting on it;
// an uninitialized slot never counts as a registered session.
type Slot = Arc<OnceCell<Arc<dyn ToolSession>>>;

/// At most one live session per identifier. Concurrent first lookups of the
/// same identifier wait on a single open.
pub struct SessionRegistry {
    connector: Arc<dyn SessionConnector>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn stdio(launcher: ServerLauncher, timeouts: SessionTimeouts) -> Self {
        Self::new(Arc::new(StdioConnector::new(launcher, timeouts)))
    }

    async fn slot(&self, identifier: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(identifier.to_string()).or_default())
    }

    /// Return the session for `identifier`, opening it on first use.
    pub async fn get_or_open(&self, identifier: &str) -> Result<Arc<dyn ToolSession>> {
        let slot = self.slot(identifier).await;
        let opened = slot
            .get_or_try_init(|| async {
                info!(identifier, "opening tool server session");
                self.connector.connect(identifier).await
            })
            .await
            .map(Arc::clone);
        if opened.is_err() {
            self.discard_failed(identifier, &slot).await;
        }
        opened
    }

    // Callers only clone a slot under the map lock, so a strong count of two
    // (map + `slot`) means nobody else will retry the open on it.
    async fn discard_failed(&self, identifier: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        let unused = slots.get(identifier).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(slot) == 2
        });
        if unused {
            slots.remove(identifier);
        }
    }

    pub async fn get(&self, identifier: &str) -> Option<Arc<dyn ToolSession>> {
        let slots = self.slots.lock().await;
        slots.get(identifier).and_then(|slot| slot.get().cloned())
    }

    /// Identifiers with a live session.
    pub async fn identifiers(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut live: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(identifier, _)| identifier.clone())
            .collect();
        live.sort();
        live
    }

    /// Close and forget the session for `identifier`. Returns whether one was live.
    pub async fn close(&self, identifier: &str) -> Result<bool> {
        let slot = self.slots.lock().await.remove(identifier);
        match slot.and_then(|slot| slot.get().cloned()) {
            Some(session) => {
                session.close().await?;
                info!(identifier, "closed tool server session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every session. Failures are logged, not returned.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        let closes = drained
            .into_iter()
            .filter_map(|(identifier, slot)| slot.get().cloned().map(|s| (identifier, s)))
            .map(|(identifier, session)| async move {
                if let Err(err) = session.close().await {
                    warn!(identifier = %identifier, error = %err, "failed to close session");
                }
            });
        join_all(closes).await;
    }
}
