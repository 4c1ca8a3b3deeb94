use std::sync::Arc;

use tracing::debug;

use super::session::DebuggerSession;
use super::transport::Transport;
use crate::cdp::target::TabId;
use crate::cdp::Command;
use crate::error::{NodemarkError, Result};

/// Sends typed CDP commands against an attached session.
#[derive(Clone)]
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
}

impl CommandDispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Send `command` and decode its result. Fails with a session error
    /// unless the session is attached.
    pub async fn send<C: Command>(
        &self,
        session: &DebuggerSession,
        command: C,
    ) -> Result<C::Response> {
        session.ensure_attached().await?;
        self.send_unchecked(session.tab(), command).await
    }

    /// Send without consulting session state. Used by the session manager,
    /// which already holds the state lock while it transitions.
    pub(crate) async fn send_unchecked<C: Command>(
        &self,
        tab: &TabId,
        command: C,
    ) -> Result<C::Response> {
        let params = serde_json::to_value(&command)?;
        debug!(method = C::METHOD, tab = %tab, "Dispatching CDP command");

        let value = self.transport.send(tab, C::METHOD, params).await?;
        serde_json::from_value(value).map_err(|e| NodemarkError::Protocol {
            method: C::METHOD.to_string(),
            code: None,
            message: format!("Unexpected response shape: {}", e),
        })
    }
}
