use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::dispatcher::CommandDispatcher;
use crate::cdp::dom;
use crate::cdp::target::TabId;
use crate::cdp::ProtocolVersion;
use crate::error::{NodemarkError, Result};

/// Lifecycle of a debugger session on one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Detached,
    Attaching,
    Attached,
    DomEnabled,
    Detaching,
}

impl SessionState {
    pub fn is_attached(&self) -> bool {
        matches!(self, SessionState::Attached | SessionState::DomEnabled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Detached => "detached",
            SessionState::Attaching => "attaching",
            SessionState::Attached => "attached",
            SessionState::DomEnabled => "dom-enabled",
            SessionState::Detaching => "detaching",
        };
        f.write_str(s)
    }
}

struct SessionInner {
    tab: TabId,
    version: ProtocolVersion,
    marker_tag: u32,
    state: Mutex<SessionState>,
    /// Serializes identity resolutions; holds the number of document
    /// requests issued so far in this session.
    resolution: Mutex<u64>,
}

/// Handle to a debugger session on one tab. Clones share the same session.
#[derive(Clone)]
pub struct DebuggerSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for DebuggerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebuggerSession")
            .field("tab", &self.inner.tab)
            .field("version", &self.inner.version)
            .field("marker_tag", &format_args!("{:08x}", self.inner.marker_tag))
            .finish()
    }
}

impl DebuggerSession {
    fn new(tab: TabId, version: ProtocolVersion) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                tab,
                version,
                marker_tag: rand::thread_rng().gen::<u32>(),
                state: Mutex::new(SessionState::Attaching),
                resolution: Mutex::new(0),
            }),
        }
    }

    pub fn tab(&self) -> &TabId {
        &self.inner.tab
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.version
    }

    /// Random per-session prefix for marker values, so markers written by
    /// different sessions on the same page never collide.
    pub fn marker_tag(&self) -> u32 {
        self.inner.marker_tag
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.lock().await
    }

    pub async fn is_attached(&self) -> bool {
        self.state().await.is_attached()
    }

    pub async fn dom_enabled(&self) -> bool {
        self.state().await == SessionState::DomEnabled
    }

    pub fn same_session(&self, other: &DebuggerSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) async fn ensure_attached(&self) -> Result<()> {
        let state = self.state().await;
        if state.is_attached() {
            Ok(())
        } else {
            Err(NodemarkError::Session(format!(
                "Session for tab {} is {}",
                self.inner.tab, state
            )))
        }
    }

    pub(crate) async fn ensure_dom_enabled(&self) -> Result<()> {
        match self.state().await {
            SessionState::DomEnabled => Ok(()),
            SessionState::Attached => Err(NodemarkError::Session(format!(
                "DOM domain is not enabled for tab {}",
                self.inner.tab
            ))),
            state => Err(NodemarkError::Session(format!(
                "Session for tab {} is {}",
                self.inner.tab, state
            ))),
        }
    }

    /// Exclusive access to the resolution pipeline of this session.
    pub(crate) async fn lock_resolution(&self) -> MutexGuard<'_, u64> {
        self.inner.resolution.lock().await
    }
}

/// Owns attach/detach of debugger sessions and the DOM domain within them.
/// At most one session exists per tab.
pub struct SessionManager {
    dispatcher: CommandDispatcher,
    version: ProtocolVersion,
    sessions: Mutex<HashMap<TabId, DebuggerSession>>,
}

impl SessionManager {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self::with_protocol_version(dispatcher, ProtocolVersion::default())
    }

    pub fn with_protocol_version(dispatcher: CommandDispatcher, version: ProtocolVersion) -> Self {
        Self {
            dispatcher,
            version,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// The live session for `tab`, if any.
    pub async fn get(&self, tab: &TabId) -> Option<DebuggerSession> {
        self.sessions.lock().await.get(tab).cloned()
    }

    /// Tabs that currently have a session.
    pub async fn tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.sessions.lock().await.keys().cloned().collect();
        tabs.sort();
        tabs
    }

    pub async fn attach(&self, tab: &TabId) -> Result<DebuggerSession> {
        let session = DebuggerSession::new(tab.clone(), self.version);
        // Held for the whole attach so a concurrent detach waits for the host
        // call to finish and then releases it.
        let mut state = session.inner.state.lock().await;

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(existing) = sessions.get(tab) {
                if !self.ended_by_host(existing).await {
                    return Err(NodemarkError::Attach {
                        tab: tab.to_string(),
                        reason: "another debugger session already owns this tab".to_string(),
                    });
                }
                info!(tab = %tab, "Host ended the previous debugger session, replacing it");
            }
            sessions.insert(tab.clone(), session.clone());
        }

        debug!(tab = %tab, version = %self.version, "Attaching debugger");
        if let Err(e) = self.dispatcher.transport().attach(tab, &self.version).await {
            *state = SessionState::Detached;
            drop(state);
            self.unregister(&session).await;
            return Err(match e {
                NodemarkError::Attach { .. } => e,
                other => NodemarkError::Attach {
                    tab: tab.to_string(),
                    reason: other.to_string(),
                },
            });
        }

        *state = SessionState::Attached;
        drop(state);
        info!(tab = %tab, "Debugger attached");
        Ok(session)
    }

    /// Enable the DOM domain. A no-op when it already is.
    pub async fn enable_dom(&self, session: &DebuggerSession) -> Result<()> {
        let mut state = session.inner.state.lock().await;
        match *state {
            SessionState::DomEnabled => Ok(()),
            SessionState::Attached => {
                self.dispatcher
                    .send_unchecked(session.tab(), dom::Enable {})
                    .await?;
                *state = SessionState::DomEnabled;
                debug!(tab = %session.tab(), "DOM domain enabled");
                Ok(())
            }
            other => Err(NodemarkError::Session(format!(
                "Cannot enable DOM: session for tab {} is {}",
                session.tab(),
                other
            ))),
        }
    }

    /// Disable the DOM domain. A no-op when it already is.
    pub async fn disable_dom(&self, session: &DebuggerSession) -> Result<()> {
        let mut state = session.inner.state.lock().await;
        match *state {
            SessionState::Attached => Ok(()),
            SessionState::DomEnabled => {
                self.dispatcher
                    .send_unchecked(session.tab(), dom::Disable {})
                    .await?;
                *state = SessionState::Attached;
                debug!(tab = %session.tab(), "DOM domain disabled");
                Ok(())
            }
            other => Err(NodemarkError::Session(format!(
                "Cannot disable DOM: session for tab {} is {}",
                session.tab(),
                other
            ))),
        }
    }

    /// Release the session. Valid from any state; host failures are logged
    /// and the session always ends up detached.
    pub async fn detach(&self, session: &DebuggerSession) {
        let tab = session.tab().clone();
        let mut state = session.inner.state.lock().await;

        if *state == SessionState::DomEnabled {
            if let Err(e) = self.dispatcher.send_unchecked(&tab, dom::Disable {}).await {
                warn!(tab = %tab, "Failed to disable DOM before detach: {}", e);
            }
        }

        if *state != SessionState::Detached {
            *state = SessionState::Detaching;
            if let Err(e) = self.dispatcher.transport().detach(&tab).await {
                warn!(tab = %tab, "Debugger detach failed, dropping session anyway: {}", e);
            }
            *state = SessionState::Detached;
            info!(tab = %tab, "Debugger detached");
        }
        drop(state);

        self.unregister(session).await;
    }

    /// Detach whatever session owns `tab`. Returns whether there was one.
    pub async fn detach_tab(&self, tab: &TabId) -> bool {
        match self.get(tab).await {
            Some(session) => {
                self.detach(&session).await;
                true
            }
            None => false,
        }
    }

    /// Detach every session, e.g. on shutdown.
    pub async fn detach_all(&self) {
        let sessions: Vec<DebuggerSession> =
            self.sessions.lock().await.values().cloned().collect();
        for session in sessions {
            self.detach(&session).await;
        }
    }

    /// Whether `session` still counts as attached here although the host has
    /// already let go of the tab. Such a session is marked detached.
    async fn ended_by_host(&self, session: &DebuggerSession) -> bool {
        // A busy session is mid-operation and therefore not stale.
        let Ok(mut state) = session.inner.state.try_lock() else {
            return false;
        };
        if !state.is_attached() || self.dispatcher.transport().is_attached(session.tab()).await {
            return false;
        }
        *state = SessionState::Detached;
        true
    }

    async fn unregister(&self, session: &DebuggerSession) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(session.tab())
            .is_some_and(|current| current.same_session(session))
        {
            sessions.remove(session.tab());
        }
    }
}
