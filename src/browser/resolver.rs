//! Turns ephemeral backend node ids into durable CSS selectors.
//!
//! The host only answers `DOM.requestNode` for nodes in its live node table,
//! and that table is populated by `DOM.getDocument`. Resolution therefore runs
//! a fixed pipeline per call:
//!
//! 1. `DOM.resolveNode` turns the backend id into a remote object handle.
//! 2. `DOM.getDocument` populates the live node table.
//! 3. `DOM.requestNode` pushes the object into the table and yields its live
//!    node id. This crosses shadow-root and frame boundaries.
//! 4. The live node gets a marker attribute (`data-nodemark-id`).
//! 5. A CSS attribute selector for the marker is returned.
//!
//! Every step awaits the previous one, and only one resolution runs at a time
//! per session.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::dispatcher::CommandDispatcher;
use super::session::DebuggerSession;
use crate::cdp::dom::{
    BackendNodeId, GetAttributes, GetDocument, NodeId, RequestNode, ResolveNode,
    SetAttributeValue,
};
use crate::error::{NodemarkError, Result};

/// Attribute written onto resolved nodes.
pub const MARKER_ATTRIBUTE: &str = "data-nodemark-id";

/// Most markers one node carries. Resolving a node again evicts its oldest
/// marker once the limit is reached, so the oldest selector stops matching.
pub const MAX_MARKER_TOKENS: usize = 16;

/// Unique marker value for one resolution.
///
/// Formatted as `<session tag>-<document request>-<live node id>`, using only
/// hex digits, decimal digits and `-`, so it never needs CSS escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorMarker {
    value: String,
}

impl SelectorMarker {
    pub fn new(session_tag: u32, document_request: u64, node_id: NodeId) -> Self {
        Self {
            value: format!("{:08x}-{}-{}", session_tag, document_request, node_id.0),
        }
    }

    pub fn attribute(&self) -> &'static str {
        MARKER_ATTRIBUTE
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Markers accumulate as whitespace-separated tokens, so the selector
    /// matches on one token rather than the whole attribute.
    pub fn selector(&self) -> ResolvedSelector {
        ResolvedSelector(format!(
            "[{}~=\"{}\"]",
            MARKER_ATTRIBUTE,
            css_quote(&self.value)
        ))
    }

    /// Attribute value to write given the node's current one: this marker
    /// last, after at most `MAX_MARKER_TOKENS - 1` of the newest earlier ones.
    fn merged_with(&self, existing: Option<&str>) -> String {
        let mut tokens: Vec<&str> = existing
            .unwrap_or_default()
            .split_whitespace()
            .filter(|t| *t != self.value)
            .collect();
        tokens.push(&self.value);
        let oldest_kept = tokens.len().saturating_sub(MAX_MARKER_TOKENS);
        tokens[oldest_kept..].join(" ")
    }
}

/// CSS selector that re-locates a resolved node until it is removed or the
/// page navigates. Expiry is not tracked; a failed lookup means it expired.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResolvedSelector(String);

impl ResolvedSelector {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResolvedSelector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ResolvedSelector> for String {
    fn from(value: ResolvedSelector) -> Self {
        value.0
    }
}

/// Escape a value for use inside a double-quoted CSS string.
fn css_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\a "),
            _ => out.push(c),
        }
    }
    out
}

pub struct NodeResolver<'a> {
    dispatcher: &'a CommandDispatcher,
}

impl<'a> NodeResolver<'a> {
    pub fn new(dispatcher: &'a CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Resolve `backend_node_id` to a selector. Requires the DOM domain.
    ///
    /// Fails with `StaleNode` if the node is gone before it could be marked;
    /// in that case nothing was written to the page.
    pub async fn resolve(
        &self,
        session: &DebuggerSession,
        backend_node_id: BackendNodeId,
    ) -> Result<ResolvedSelector> {
        session.ensure_dom_enabled().await?;
        let mut document_requests = session.lock_resolution().await;

        let resolved = self
            .dispatcher
            .send(session, ResolveNode { backend_node_id })
            .await
            .map_err(|e| stale_on_protocol(e, backend_node_id))?;
        let object_id = resolved.object.object_id.ok_or_else(|| NodemarkError::StaleNode {
            backend_node_id: backend_node_id.0,
            reason: "host returned no object handle".to_string(),
        })?;

        // Only the side effect matters: it (re)builds the live node table.
        self.dispatcher
            .send(session, GetDocument::default())
            .await?;
        *document_requests += 1;

        let node_id = self
            .dispatcher
            .send(session, RequestNode { object_id })
            .await
            .map_err(|e| stale_on_protocol(e, backend_node_id))?
            .node_id;
        if !node_id.is_valid() {
            return Err(NodemarkError::StaleNode {
                backend_node_id: backend_node_id.0,
                reason: "node is no longer in the document".to_string(),
            });
        }

        let marker = SelectorMarker::new(session.marker_tag(), *document_requests, node_id);
        let existing = self
            .dispatcher
            .send(session, GetAttributes { node_id })
            .await
            .map_err(|e| stale_on_missing_node(e, backend_node_id))?;
        let value = marker.merged_with(existing.get(MARKER_ATTRIBUTE));

        self.dispatcher
            .send(
                session,
                SetAttributeValue {
                    node_id,
                    name: MARKER_ATTRIBUTE.to_string(),
                    value,
                },
            )
            .await
            .map_err(|e| stale_on_missing_node(e, backend_node_id))?;

        let selector = marker.selector();
        debug!(
            tab = %session.tab(),
            backend_node_id = backend_node_id.0,
            node_id = node_id.0,
            %selector,
            "Resolved node"
        );
        Ok(selector)
    }
}

fn stale_on_protocol(err: NodemarkError, backend_node_id: BackendNodeId) -> NodemarkError {
    match err {
        NodemarkError::Protocol {
            method, message, ..
        } => NodemarkError::StaleNode {
            backend_node_id: backend_node_id.0,
            reason: format!("{}: {}", method, message),
        },
        other => other,
    }
}

fn stale_on_missing_node(err: NodemarkError, backend_node_id: BackendNodeId) -> NodemarkError {
    if err.is_missing_node() {
        stale_on_protocol(err, backend_node_id)
    } else {
        err
    }
}
