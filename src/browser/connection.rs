//! Browser-level CDP connection over WebSocket.
//!
//! One socket carries every tab: tabs are attached with flattened
//! `Target.attachToTarget` sessions and each session command carries the
//! resulting `sessionId`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::transport::Transport;
use crate::cdp::browser::GetVersion;
use crate::cdp::target::{
    AttachToTarget, DetachFromTarget, DetachedFromTarget, GetTargets, TabId, TargetInfo,
};
use crate::cdp::{Command, ProtocolVersion};
use crate::error::{NodemarkError, Result};

type Pending = Mutex<HashMap<u64, oneshot::Sender<Value>>>;

/// Turn `--cdp` style input into a browser WebSocket URL.
///
/// Accepts a `ws://`/`wss://` URL as-is, or a port / `http://` base URL whose
/// `/json/version` endpoint names the browser socket.
pub async fn resolve_endpoint(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_string());
    }

    let base = if let Ok(port) = endpoint.parse::<u16>() {
        format!("http://127.0.0.1:{}", port)
    } else if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        return Err(NodemarkError::CdpConnectionFailed(
            "Invalid endpoint. Use a port number, an http:// URL or a WebSocket URL (ws://...)."
                .to_string(),
        ));
    };

    let version_url = format!("{}/json/version", base);
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let resp = client.get(&version_url).send().await.map_err(|e| {
        NodemarkError::CdpConnectionFailed(format!(
            "Cannot reach CDP at {}. Is the browser running with --remote-debugging-port? Error: {}",
            base, e
        ))
    })?;

    let version_info: Value = resp.json().await.map_err(|e| {
        NodemarkError::CdpConnectionFailed(format!("Invalid response from CDP endpoint: {}", e))
    })?;

    version_info
        .get("webSocketDebuggerUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            NodemarkError::CdpConnectionFailed(format!(
                "{} did not report a webSocketDebuggerUrl",
                version_url
            ))
        })
}

/// A [`Transport`] backed by a real browser.
pub struct CdpConnection {
    wire: Arc<Wire>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Debugger session of one tab as this connection sees it.
#[derive(Clone)]
enum SessionSlot {
    /// `Target.attachToTarget` is in flight; the flag turns true once it settles.
    Attaching(watch::Receiver<bool>),
    Attached(String),
}

/// Socket state shared by the connection, its reader task and attach tasks.
struct Wire {
    ws_tx: mpsc::Sender<String>,
    pending: Pending,
    sessions: Mutex<HashMap<TabId, SessionSlot>>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl CdpConnection {
    /// Resolve `endpoint` (port, http URL or ws URL) and connect.
    pub async fn connect_endpoint(endpoint: &str) -> Result<Self> {
        let ws_url = resolve_endpoint(endpoint).await?;
        Self::connect(&ws_url).await
    }

    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            NodemarkError::CdpConnectionFailed(format!(
                "WebSocket connection to {} failed: {}",
                ws_url, e
            ))
        })?;
        info!("Connected to CDP at {}", ws_url);

        let (mut sink, mut stream) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let wire = Arc::new(Wire {
            ws_tx,
            pending: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });

        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(msg.into())).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        let reader = {
            let wire = wire.clone();
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let Ok(val) = serde_json::from_str::<Value>(text.as_str()) else {
                                warn!("Ignoring malformed CDP message");
                                continue;
                            };
                            if let Some(id) = val.get("id").and_then(Value::as_u64) {
                                if let Some(tx) = wire.pending.lock().await.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            } else if val.get("method").and_then(Value::as_str)
                                == Some(DetachedFromTarget::EVENT)
                            {
                                wire.forget_session(val.get("params")).await;
                            }
                        }
                        Ok(Message::Close(_)) => {
                            debug!("CDP WebSocket closed by browser");
                            break;
                        }
                        Err(e) => {
                            warn!("CDP WebSocket read error: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
                wire.closed.store(true, Ordering::SeqCst);
                // Dropping the senders fails every waiting command.
                wire.pending.lock().await.clear();
                wire.sessions.lock().await.clear();
            })
        };

        Ok(Self {
            wire,
            reader,
            writer,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.wire.is_closed()
    }

    /// Page targets the browser currently has.
    pub async fn list_tabs(&self) -> Result<Vec<TargetInfo>> {
        let targets = self.wire.command(None, GetTargets {}).await?;
        Ok(targets
            .target_infos
            .into_iter()
            .filter(|t| t.target_type == "page")
            .collect())
    }

    /// Protocol version the browser speaks.
    pub async fn protocol_version(&self) -> Result<ProtocolVersion> {
        let version = self.wire.command(None, GetVersion {}).await?;
        version.protocol_version.parse().map_err(|_| NodemarkError::Protocol {
            method: GetVersion::METHOD.to_string(),
            code: None,
            message: format!("Unparseable protocol version {:?}", version.protocol_version),
        })
    }
}

impl Wire {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn command<C: Command>(
        &self,
        session_id: Option<&str>,
        command: C,
    ) -> Result<C::Response> {
        let params = serde_json::to_value(&command)?;
        let value = self.call(session_id, C::METHOD, params).await?;
        serde_json::from_value(value).map_err(|e| NodemarkError::Protocol {
            method: C::METHOD.to_string(),
            code: None,
            message: format!("Unexpected response shape: {}", e),
        })
    }

    async fn call(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(NodemarkError::CdpConnectionFailed(
                "CDP connection is closed".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut msg = json!({"id": id, "method": method, "params": params});
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        // The reader may have shut down since the check above.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(NodemarkError::CdpConnectionFailed(
                "CDP connection is closed".to_string(),
            ));
        }

        if let Err(e) = self.ws_tx.send(msg.to_string()).await {
            self.pending.lock().await.remove(&id);
            return Err(NodemarkError::CdpConnectionFailed(format!(
                "Failed to send {}: {}",
                method, e
            )));
        }

        let response = rx.await.map_err(|_| {
            NodemarkError::CdpConnectionFailed(format!(
                "Connection closed before {} was answered",
                method
            ))
        })?;

        if let Some(err) = response.get("error") {
            return Err(NodemarkError::Protocol {
                method: method.to_string(),
                code: err.get("code").and_then(Value::as_i64),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or_else(|| json!({})))
    }

    async fn session_id(&self, tab: &TabId) -> Result<String> {
        match self.sessions.lock().await.get(tab) {
            Some(SessionSlot::Attached(session_id)) => Ok(session_id.clone()),
            Some(SessionSlot::Attaching(_)) => Err(NodemarkError::Session(format!(
                "Debugger is still attaching to tab {}",
                tab
            ))),
            None => Err(not_attached(tab)),
        }
    }

    /// Send `Target.attachToTarget` and record the outcome, then signal `done`.
    async fn attach_to_target(&self, tab: TabId, done: watch::Sender<bool>) -> Result<String> {
        let result = self
            .command(
                None,
                AttachToTarget {
                    target_id: tab.clone(),
                    flatten: true,
                },
            )
            .await;

        let mut sessions = self.sessions.lock().await;
        match &result {
            Ok(attached) if !self.is_closed() => {
                debug!(tab = %tab, session_id = %attached.session_id, "Attached to target");
                sessions.insert(tab, SessionSlot::Attached(attached.session_id.clone()));
            }
            _ => {
                sessions.remove(&tab);
            }
        }
        drop(sessions);
        let _ = done.send(true);
        result.map(|attached| attached.session_id)
    }

    async fn forget_session(&self, params: Option<&Value>) {
        let Some(event) = params
            .cloned()
            .and_then(|p| serde_json::from_value::<DetachedFromTarget>(p).ok())
        else {
            return;
        };
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, slot| {
            !matches!(slot, SessionSlot::Attached(id) if *id == event.session_id)
        });
        if sessions.len() != before {
            info!(session_id = %event.session_id, "Browser detached debugger session");
        }
    }
}

fn not_attached(tab: &TabId) -> NodemarkError {
    NodemarkError::Session(format!("Debugger is not attached to tab {}", tab))
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        self.wire.closed.store(true, Ordering::SeqCst);
        // Attach tasks outlive the connection; fail whatever they wait on.
        if let Ok(mut pending) = self.wire.pending.try_lock() {
            pending.clear();
        }
    }
}

#[async_trait]
impl Transport for CdpConnection {
    async fn attach(&self, tab: &TabId, version: &ProtocolVersion) -> Result<()> {
        let attach_error = |reason: String| NodemarkError::Attach {
            tab: tab.to_string(),
            reason,
        };
        let already = || attach_error("already attached on this connection".to_string());

        if self.wire.sessions.lock().await.contains_key(tab) {
            return Err(already());
        }

        let host_version = self.protocol_version().await?;
        if !version.is_supported_by(&host_version) {
            return Err(attach_error(format!(
                "Requested protocol version {} is not supported (browser speaks {})",
                version, host_version
            )));
        }

        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut sessions = self.wire.sessions.lock().await;
            if sessions.contains_key(tab) {
                return Err(already());
            }
            sessions.insert(tab.clone(), SessionSlot::Attaching(done_rx));
        }

        // Spawned so that a caller giving up mid-attach cannot leave a browser
        // session nobody knows about: the outcome is recorded either way.
        let task = {
            let wire = self.wire.clone();
            let tab = tab.clone();
            tokio::spawn(async move { wire.attach_to_target(tab, done_tx).await })
        };
        let outcome = task
            .await
            .map_err(|e| NodemarkError::Other(format!("Attach task failed: {}", e)))?;
        outcome.map_err(|e| match e {
            NodemarkError::Protocol { message, .. } => attach_error(message),
            other => other,
        })?;
        Ok(())
    }

    async fn detach(&self, tab: &TabId) -> Result<()> {
        loop {
            let mut sessions = self.wire.sessions.lock().await;
            match sessions.remove(tab) {
                Some(SessionSlot::Attached(session_id)) => {
                    drop(sessions);
                    self.wire.command(None, DetachFromTarget { session_id }).await?;
                    return Ok(());
                }
                Some(SessionSlot::Attaching(mut done)) => {
                    sessions.insert(tab.clone(), SessionSlot::Attaching(done.clone()));
                    drop(sessions);
                    debug!(tab = %tab, "Waiting for in-flight attach before detaching");
                    let settled = done.wait_for(|settled| *settled).await.is_ok();
                    if !settled {
                        // The attach task is gone without recording anything.
                        let mut sessions = self.wire.sessions.lock().await;
                        if matches!(sessions.get(tab), Some(SessionSlot::Attaching(_))) {
                            sessions.remove(tab);
                        }
                        return Err(not_attached(tab));
                    }
                }
                None => return Err(not_attached(tab)),
            }
        }
    }

    async fn send(&self, tab: &TabId, method: &str, params: Value) -> Result<Value> {
        let session_id = self.wire.session_id(tab).await?;
        self.wire.call(Some(&session_id), method, params).await
    }

    async fn is_attached(&self, tab: &TabId) -> bool {
        matches!(
            self.wire.sessions.lock().await.get(tab),
            Some(SessionSlot::Attached(_))
        )
    }
}
