//! In-memory debugger host for tests and offline use.
//!
//! Simulates the parts of a browser the crate talks to: tabs with a flat
//! element list, the DOM live node table (rebuilt on every
//! `DOM.getDocument`), remote object handles, attributes, the accessibility
//! tree, and the page scripts [`PageInteraction`](super::PageInteraction)
//! emits. Failures can be injected per method and nodes removed mid-pipeline.
//!
//! ```ignore
//! let host = FakeHost::new();
//! host.add_tab("T", FakePage::new().element(FakeElement::button(10, "Go")));
//! let controller = Controller::new(host.transport());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::interaction::PageAction;
use super::transport::Transport;
use crate::cdp::target::TabId;
use crate::cdp::ProtocolVersion;
use crate::error::{NodemarkError, Result};

const ROOT_BACKEND_ID: i64 = 1;
const SERVER_ERROR: i64 = -32000;

/// One element of a fake page.
#[derive(Debug, Clone)]
pub struct FakeElement {
    pub backend_node_id: i64,
    pub tag: String,
    pub role: String,
    pub name: Option<String>,
    pub focusable: bool,
    pub parent: Option<i64>,
    pub attributes: Vec<(String, String)>,
    pub value: Option<String>,
    present: bool,
}

impl FakeElement {
    pub fn new(backend_node_id: i64, tag: &str) -> Self {
        Self {
            backend_node_id,
            tag: tag.to_string(),
            role: "generic".to_string(),
            name: None,
            focusable: false,
            parent: None,
            attributes: Vec::new(),
            value: None,
            present: true,
        }
    }

    pub fn button(backend_node_id: i64, name: &str) -> Self {
        Self::new(backend_node_id, "button")
            .role("button")
            .name(name)
            .focusable(true)
    }

    pub fn textbox(backend_node_id: i64, name: &str) -> Self {
        Self::new(backend_node_id, "input")
            .role("textbox")
            .name(name)
            .focusable(true)
            .with_value("")
    }

    pub fn link(backend_node_id: i64, name: &str, href: &str) -> Self {
        Self::new(backend_node_id, "a")
            .role("link")
            .name(name)
            .focusable(true)
            .attribute("href", href)
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn focusable(mut self, focusable: bool) -> Self {
        self.focusable = focusable;
        self
    }

    pub fn child_of(mut self, parent: i64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }
}

/// Content of a fake tab. Elements are kept in document order.
#[derive(Debug, Clone)]
pub struct FakePage {
    pub title: String,
    pub elements: Vec<FakeElement>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            title: "Fake page".to_string(),
            elements: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn element(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    fn find(&self, backend: i64) -> Option<&FakeElement> {
        self.elements
            .iter()
            .find(|e| e.present && e.backend_node_id == backend)
    }

    fn find_mut(&mut self, backend: i64) -> Option<&mut FakeElement> {
        self.elements
            .iter_mut()
            .find(|e| e.present && e.backend_node_id == backend)
    }

    fn exists(&self, backend: i64) -> bool {
        backend == ROOT_BACKEND_ID || self.find(backend).is_some()
    }

    /// Remove an element and everything below it.
    fn remove(&mut self, backend: i64) {
        let mut doomed = vec![backend];
        while let Some(id) = doomed.pop() {
            for element in self.elements.iter_mut().filter(|e| e.present) {
                if element.backend_node_id == id {
                    element.present = false;
                } else if element.parent == Some(id) {
                    doomed.push(element.backend_node_id);
                }
            }
        }
    }

    fn query(&self, selector: &str) -> Vec<i64> {
        let Some(selector) = SimpleSelector::parse(selector) else {
            return Vec::new();
        };
        self.elements
            .iter()
            .filter(|e| e.present && selector.matches(e))
            .map(|e| e.backend_node_id)
            .collect()
    }

    fn ax_nodes(&self) -> Vec<Value> {
        let present: Vec<&FakeElement> = self.elements.iter().filter(|e| e.present).collect();
        let parent_of = |e: &FakeElement| {
            e.parent
                .filter(|p| present.iter().any(|o| o.backend_node_id == *p))
                .unwrap_or(ROOT_BACKEND_ID)
        };
        let children_of = |id: i64| -> Vec<String> {
            present
                .iter()
                .filter(|e| parent_of(**e) == id)
                .map(|e| e.backend_node_id.to_string())
                .collect()
        };

        let mut nodes = vec![json!({
            "nodeId": ROOT_BACKEND_ID.to_string(),
            "ignored": false,
            "role": {"type": "internalRole", "value": "RootWebArea"},
            "name": {"type": "computedString", "value": self.title},
            "properties": [{"name": "focusable", "value": {"type": "booleanOrUndefined", "value": true}}],
            "childIds": children_of(ROOT_BACKEND_ID),
            "backendDOMNodeId": ROOT_BACKEND_ID,
        })];
        for element in &present {
            let mut properties = Vec::new();
            if element.focusable {
                properties.push(json!({"name": "focusable", "value": {"type": "booleanOrUndefined", "value": true}}));
            }
            let mut node = json!({
                "nodeId": element.backend_node_id.to_string(),
                "ignored": element.role == "none",
                "role": {"type": "role", "value": element.role},
                "properties": properties,
                "parentId": parent_of(*element).to_string(),
                "childIds": children_of(element.backend_node_id),
                "backendDOMNodeId": element.backend_node_id,
            });
            if let Some(name) = &element.name {
                node["name"] = json!({"type": "computedString", "value": name});
            }
            if let Some(value) = &element.value {
                node["value"] = json!({"type": "string", "value": value});
            }
            nodes.push(node);
        }
        nodes
    }
}

/// The selector forms the fake page understands: `[attr~="v"]`, `[attr="v"]`,
/// `#id` and a bare tag name.
enum SimpleSelector {
    Attribute {
        name: String,
        value: String,
        token: bool,
    },
    Id(String),
    Tag(String),
}

impl SimpleSelector {
    fn parse(selector: &str) -> Option<Self> {
        let selector = selector.trim();
        if let Some(inner) = selector.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let (name, raw, token) = match inner.split_once("~=") {
                Some((name, raw)) => (name, raw, true),
                None => {
                    let (name, raw) = inner.split_once('=')?;
                    (name, raw, false)
                }
            };
            let quoted = raw.strip_prefix('"')?.strip_suffix('"')?;
            let mut value = String::new();
            let mut chars = quoted.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    value.extend(chars.next());
                } else {
                    value.push(c);
                }
            }
            return Some(SimpleSelector::Attribute {
                name: name.trim().to_string(),
                value,
                token,
            });
        }
        if let Some(id) = selector.strip_prefix('#') {
            return Some(SimpleSelector::Id(id.to_string()));
        }
        if !selector.is_empty() && selector.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some(SimpleSelector::Tag(selector.to_ascii_lowercase()));
        }
        None
    }

    fn matches(&self, element: &FakeElement) -> bool {
        match self {
            SimpleSelector::Attribute { name, value, token } => {
                match element.get_attribute(name) {
                    Some(actual) if *token => actual.split_whitespace().any(|t| t == value),
                    Some(actual) => actual == value,
                    None => false,
                }
            }
            SimpleSelector::Id(id) => element.get_attribute("id") == Some(id.as_str()),
            SimpleSelector::Tag(tag) => element.tag.eq_ignore_ascii_case(tag),
        }
    }
}

/// A command the host received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tab: TabId,
    pub method: String,
    pub params: Value,
}

struct InjectedFailure {
    method: String,
    message: String,
}

struct PendingRemoval {
    tab: String,
    after_method: String,
    backend_node_id: i64,
}

struct FakeTab {
    page: FakePage,
    attached: bool,
    dom_enabled: bool,
    document_requested: bool,
    live_nodes: HashMap<i64, i64>,
    next_node_id: i64,
    objects: HashMap<String, i64>,
    clicks: Vec<i64>,
    evaluated: Vec<String>,
}

impl FakeTab {
    fn new(page: FakePage) -> Self {
        Self {
            page,
            attached: false,
            dom_enabled: false,
            document_requested: false,
            live_nodes: HashMap::new(),
            next_node_id: 1,
            objects: HashMap::new(),
            clicks: Vec::new(),
            evaluated: Vec::new(),
        }
    }

    fn reset_dom(&mut self) {
        self.dom_enabled = false;
        self.document_requested = false;
        self.live_nodes.clear();
        self.objects.clear();
    }

    /// Backend id behind a live node id, if that node still exists.
    fn live_backend(&self, node_id: i64) -> Option<i64> {
        self.live_nodes
            .iter()
            .find(|(_, live)| **live == node_id)
            .map(|(backend, _)| *backend)
            .filter(|backend| self.page.exists(*backend))
    }
}

struct HostState {
    version: ProtocolVersion,
    latency: Option<Duration>,
    tabs: HashMap<String, FakeTab>,
    calls: Vec<RecordedCall>,
    failures: Vec<InjectedFailure>,
    removals: Vec<PendingRemoval>,
    next_object: u64,
}

/// In-memory [`Transport`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                version: ProtocolVersion::DEFAULT,
                latency: None,
                tabs: HashMap::new(),
                calls: Vec::new(),
                failures: Vec::new(),
                removals: Vec::new(),
                next_object: 1,
            })),
        }
    }

    /// Delay every host call, so concurrent callers actually interleave.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    /// Protocol version the host claims to speak.
    pub fn with_protocol_version(self, version: ProtocolVersion) -> Self {
        self.lock().version = version;
        self
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn add_tab(&self, tab: &str, page: FakePage) {
        self.lock().tabs.insert(tab.to_string(), FakeTab::new(page));
    }

    /// Close a tab, as if the user did.
    pub fn close_tab(&self, tab: &str) {
        self.lock().tabs.remove(tab);
    }

    /// Make the next call of `method` (on any tab) fail with `message`.
    pub fn fail_next(&self, method: &str, message: &str) {
        self.lock().failures.push(InjectedFailure {
            method: method.to_string(),
            message: message.to_string(),
        });
    }

    /// Remove an element right after the next successful `after_method`
    /// call on `tab`.
    pub fn remove_node_after(&self, tab: &str, after_method: &str, backend_node_id: i64) {
        self.lock().removals.push(PendingRemoval {
            tab: tab.to_string(),
            after_method: after_method.to_string(),
            backend_node_id,
        });
    }

    pub fn remove_node(&self, tab: &str, backend_node_id: i64) {
        if let Some(t) = self.lock().tabs.get_mut(tab) {
            t.page.remove(backend_node_id);
        }
    }

    /// End the debugger attachment of `tab` from the host side, as a browser
    /// does when the user dismisses the debugging banner.
    pub fn drop_debugger(&self, tab: &str) {
        if let Some(t) = self.lock().tabs.get_mut(tab) {
            t.attached = false;
            t.reset_dom();
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.method.clone()).collect()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.method == method).count()
    }

    pub fn is_attached(&self, tab: &str) -> bool {
        self.lock().tabs.get(tab).is_some_and(|t| t.attached)
    }

    pub fn is_dom_enabled(&self, tab: &str) -> bool {
        self.lock().tabs.get(tab).is_some_and(|t| t.dom_enabled)
    }

    pub fn attribute(&self, tab: &str, backend_node_id: i64, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .tabs
            .get(tab)?
            .page
            .find(backend_node_id)?
            .get_attribute(name)
            .map(str::to_string)
    }

    /// Backend ids of present elements matching `selector`.
    pub fn query(&self, tab: &str, selector: &str) -> Vec<i64> {
        self.lock()
            .tabs
            .get(tab)
            .map(|t| t.page.query(selector))
            .unwrap_or_default()
    }

    pub fn clicks(&self, tab: &str) -> Vec<i64> {
        self.lock()
            .tabs
            .get(tab)
            .map(|t| t.clicks.clone())
            .unwrap_or_default()
    }

    pub fn value(&self, tab: &str, backend_node_id: i64) -> Option<String> {
        self.lock()
            .tabs
            .get(tab)?
            .page
            .find(backend_node_id)?
            .value
            .clone()
    }

    /// Scripts run through `Runtime.evaluate` that were not page actions.
    pub fn evaluated(&self, tab: &str) -> Vec<String> {
        self.lock()
            .tabs
            .get(tab)
            .map(|t| t.evaluated.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn protocol_error(method: &str, message: &str) -> NodemarkError {
    NodemarkError::Protocol {
        method: method.to_string(),
        code: Some(SERVER_ERROR),
        message: message.to_string(),
    }
}

impl HostState {
    fn record(&mut self, tab: &TabId, method: &str, params: &Value) {
        self.calls.push(RecordedCall {
            tab: tab.clone(),
            method: method.to_string(),
            params: params.clone(),
        });
    }

    fn take_failure(&mut self, method: &str) -> Option<NodemarkError> {
        let index = self.failures.iter().position(|f| f.method == method)?;
        let failure = self.failures.remove(index);
        Some(protocol_error(method, &failure.message))
    }

    fn apply_removals(&mut self, tab: &str, method: &str) {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.removals)
            .into_iter()
            .partition(|r| r.tab == tab && r.after_method == method);
        self.removals = rest;
        if let Some(t) = self.tabs.get_mut(tab) {
            for removal in due {
                t.page.remove(removal.backend_node_id);
            }
        }
    }

    fn execute(&mut self, tab_id: &str, method: &str, params: &Value) -> Result<Value> {
        let next_object = self.next_object;
        let tab = self.tabs.get_mut(tab_id).ok_or_else(|| {
            NodemarkError::Session(format!("No tab with given id: {}", tab_id))
        })?;
        if !tab.attached {
            return Err(NodemarkError::Session(format!(
                "Debugger is not attached to tab {}",
                tab_id
            )));
        }

        let requires_dom = method.starts_with("DOM.") && method != "DOM.enable";
        if requires_dom && !tab.dom_enabled {
            return Err(protocol_error(method, "DOM agent is not enabled"));
        }

        let node_param = |name: &str| params.get(name).and_then(Value::as_i64).unwrap_or(0);

        match method {
            "DOM.enable" => {
                tab.dom_enabled = true;
                Ok(json!({}))
            }
            "DOM.disable" => {
                tab.reset_dom();
                Ok(json!({}))
            }
            "DOM.resolveNode" => {
                let backend = node_param("backendNodeId");
                if !tab.page.exists(backend) {
                    return Err(protocol_error(method, "No node with given id found"));
                }
                let object_id = format!("fake-object-{}", next_object);
                self.next_object += 1;
                tab.objects.insert(object_id.clone(), backend);
                Ok(json!({
                    "object": {
                        "type": "object",
                        "subtype": "node",
                        "className": "HTMLElement",
                        "objectId": object_id,
                    }
                }))
            }
            "DOM.getDocument" => {
                tab.document_requested = true;
                tab.live_nodes.clear();
                tab.live_nodes.insert(ROOT_BACKEND_ID, 1);
                tab.next_node_id = 2;
                Ok(json!({
                    "root": {"nodeId": 1, "backendNodeId": ROOT_BACKEND_ID, "nodeName": "#document"}
                }))
            }
            "DOM.requestNode" => {
                let object_id = params.get("objectId").and_then(Value::as_str).unwrap_or("");
                let backend = *tab
                    .objects
                    .get(object_id)
                    .ok_or_else(|| protocol_error(method, "Could not find object with given id"))?;
                if !tab.document_requested {
                    return Err(protocol_error(method, "Document needs to be requested first"));
                }
                if !tab.page.exists(backend) {
                    return Ok(json!({"nodeId": 0}));
                }
                let node_id = match tab.live_nodes.get(&backend) {
                    Some(id) => *id,
                    None => {
                        let id = tab.next_node_id;
                        tab.next_node_id += 1;
                        tab.live_nodes.insert(backend, id);
                        id
                    }
                };
                Ok(json!({"nodeId": node_id}))
            }
            "DOM.getAttributes" => {
                let backend = tab
                    .live_backend(node_param("nodeId"))
                    .ok_or_else(|| protocol_error(method, "Could not find node with given id"))?;
                let attributes: Vec<&str> = match tab.page.find(backend) {
                    Some(e) => e
                        .attributes
                        .iter()
                        .flat_map(|(k, v)| [k.as_str(), v.as_str()])
                        .collect(),
                    None => Vec::new(),
                };
                Ok(json!({"attributes": attributes}))
            }
            "DOM.setAttributeValue" => {
                let backend = tab
                    .live_backend(node_param("nodeId"))
                    .ok_or_else(|| protocol_error(method, "Could not find node with given id"))?;
                let element = tab.page.find_mut(backend).ok_or_else(|| {
                    protocol_error(method, "Cannot set attributes on the document")
                })?;
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                let value = params.get("value").and_then(Value::as_str).unwrap_or("");
                element.set_attribute(name, value);
                Ok(json!({}))
            }
            "Runtime.evaluate" => {
                let expression = params.get("expression").and_then(Value::as_str).unwrap_or("");
                Ok(evaluate(tab, expression))
            }
            "Accessibility.getFullAXTree" => Ok(json!({"nodes": tab.page.ax_nodes()})),
            other => Err(protocol_error(other, &format!("'{}' wasn't found", other))),
        }
    }
}

fn evaluate(tab: &mut FakeTab, expression: &str) -> Value {
    if let Some(action) = PageAction::parse_expression(expression) {
        let target = tab.page.query(action.selector()).into_iter().next();
        let found = match (target, action) {
            (None, _) => false,
            (Some(backend), PageAction::Click { .. }) => {
                tab.clicks.push(backend);
                true
            }
            (Some(backend), PageAction::Fill { text, .. }) => {
                if let Some(element) = tab.page.find_mut(backend) {
                    element.value = Some(text);
                }
                true
            }
        };
        return json!({"result": {"type": "boolean", "value": found}});
    }

    tab.evaluated.push(expression.to_string());
    if let Some(thrown) = expression.trim_start().strip_prefix("throw") {
        return json!({
            "result": {"type": "object", "subtype": "error"},
            "exceptionDetails": {
                "text": "Uncaught",
                "lineNumber": 0,
                "columnNumber": 0,
                "exception": {
                    "type": "object",
                    "subtype": "error",
                    "description": format!("Uncaught {}", thrown.trim().trim_end_matches(';')),
                }
            }
        });
    }
    json!({"result": {"type": "undefined"}})
}

#[async_trait]
impl Transport for FakeHost {
    async fn attach(&self, tab: &TabId, version: &ProtocolVersion) -> Result<()> {
        self.pause().await;
        let mut state = self.lock();
        let method = "Target.attachToTarget";
        state.record(tab, method, &json!({"targetId": tab.as_str(), "flatten": true}));
        if let Some(err) = state.take_failure(method) {
            return Err(err);
        }
        let host_version = state.version;
        let entry = state.tabs.get_mut(tab.as_str()).ok_or_else(|| NodemarkError::Attach {
            tab: tab.to_string(),
            reason: "No tab with given id".to_string(),
        })?;
        if entry.attached {
            return Err(NodemarkError::Attach {
                tab: tab.to_string(),
                reason: "Another debugger is already attached".to_string(),
            });
        }
        if !version.is_supported_by(&host_version) {
            return Err(NodemarkError::Attach {
                tab: tab.to_string(),
                reason: format!(
                    "Requested protocol version {} is not supported (host speaks {})",
                    version, host_version
                ),
            });
        }
        entry.attached = true;
        Ok(())
    }

    async fn detach(&self, tab: &TabId) -> Result<()> {
        self.pause().await;
        let mut state = self.lock();
        let method = "Target.detachFromTarget";
        state.record(tab, method, &json!({"targetId": tab.as_str()}));
        if let Some(err) = state.take_failure(method) {
            // The host still tears the session down.
            if let Some(entry) = state.tabs.get_mut(tab.as_str()) {
                entry.attached = false;
                entry.reset_dom();
            }
            return Err(err);
        }
        match state.tabs.get_mut(tab.as_str()) {
            Some(entry) if entry.attached => {
                entry.attached = false;
                entry.reset_dom();
                Ok(())
            }
            _ => Err(NodemarkError::Session(format!(
                "Debugger is not attached to tab {}",
                tab
            ))),
        }
    }

    async fn send(&self, tab: &TabId, method: &str, params: Value) -> Result<Value> {
        self.pause().await;
        let mut state = self.lock();
        state.record(tab, method, &params);
        if let Some(err) = state.take_failure(method) {
            return Err(err);
        }
        let result = state.execute(tab.as_str(), method, &params)?;
        state.apply_removals(tab.as_str(), method);
        Ok(result)
    }

    async fn is_attached(&self, tab: &TabId) -> bool {
        FakeHost::is_attached(self, tab.as_str())
    }
}
