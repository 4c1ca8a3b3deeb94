use std::sync::Arc;

use super::dispatcher::CommandDispatcher;
use super::interaction::PageInteraction;
use super::resolver::{NodeResolver, ResolvedSelector};
use super::session::{DebuggerSession, SessionManager};
use super::snapshot::{AccessibilitySnapshot, AxTree};
use super::transport::Transport;
use crate::cdp::dom::BackendNodeId;
use crate::cdp::target::TabId;
use crate::cdp::ProtocolVersion;
use crate::config::SessionConfig;
use crate::error::{NodemarkError, Result};

/// Tab-keyed entry point for an automation agent.
///
/// Wraps session management, node resolution, page interaction and
/// accessibility snapshots behind one handle per transport.
pub struct Controller {
    sessions: SessionManager,
    enable_dom_on_attach: bool,
}

impl Controller {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ProtocolVersion::default(), &SessionConfig::default())
    }

    pub fn with_options(
        transport: Arc<dyn Transport>,
        version: ProtocolVersion,
        config: &SessionConfig,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(transport);
        Self {
            sessions: SessionManager::with_protocol_version(dispatcher, version),
            enable_dom_on_attach: config.enable_dom_on_attach,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn dispatcher(&self) -> &CommandDispatcher {
        self.sessions.dispatcher()
    }

    /// Attach to `tab`, enabling the DOM domain unless configured otherwise.
    /// If enabling fails the session is released again.
    pub async fn attach(&self, tab: &TabId) -> Result<DebuggerSession> {
        let session = self.sessions.attach(tab).await?;
        if self.enable_dom_on_attach {
            if let Err(e) = self.sessions.enable_dom(&session).await {
                self.sessions.detach(&session).await;
                return Err(e);
            }
        }
        Ok(session)
    }

    /// Release `tab`. Safe to call when nothing is attached.
    pub async fn detach(&self, tab: &TabId) {
        self.sessions.detach_tab(tab).await;
    }

    pub async fn enable_dom(&self, tab: &TabId) -> Result<()> {
        let session = self.session(tab).await?;
        self.sessions.enable_dom(&session).await
    }

    pub async fn disable_dom(&self, tab: &TabId) -> Result<()> {
        let session = self.session(tab).await?;
        self.sessions.disable_dom(&session).await
    }

    pub async fn get_accessibility_tree(&self, tab: &TabId) -> Result<AxTree> {
        let session = self.session(tab).await?;
        AccessibilitySnapshot::new(self.dispatcher())
            .get_tree(&session)
            .await
    }

    pub async fn resolve_selector(
        &self,
        tab: &TabId,
        backend_node_id: BackendNodeId,
    ) -> Result<ResolvedSelector> {
        let session = self.session(tab).await?;
        NodeResolver::new(self.dispatcher())
            .resolve(&session, backend_node_id)
            .await
    }

    pub async fn click(&self, tab: &TabId, selector: &str) -> Result<()> {
        let session = self.session(tab).await?;
        PageInteraction::new(self.dispatcher())
            .click(&session, selector)
            .await
    }

    pub async fn fill(&self, tab: &TabId, selector: &str, text: &str) -> Result<()> {
        let session = self.session(tab).await?;
        PageInteraction::new(self.dispatcher())
            .fill(&session, selector, text)
            .await
    }

    pub async fn evaluate(&self, tab: &TabId, script: &str) -> Result<()> {
        let session = self.session(tab).await?;
        PageInteraction::new(self.dispatcher())
            .evaluate(&session, script)
            .await
    }

    async fn session(&self, tab: &TabId) -> Result<DebuggerSession> {
        self.sessions
            .get(tab)
            .await
            .ok_or_else(|| NodemarkError::Session(format!("No debugger session for tab {}", tab)))
    }
}
