//! Accessibility tree retrieval.
//!
//! The host reports the tree as a flat list linked by `childIds` and
//! `parentId`; [`AxTree::from_nodes`] rebuilds the nesting.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::dispatcher::CommandDispatcher;
use super::session::DebuggerSession;
use crate::cdp::accessibility::{AxNode, AxProperty, AxValue, GetFullAxTree};
use crate::cdp::dom::BackendNodeId;
use crate::error::Result;

const ROOT_ROLE: &str = "RootWebArea";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxTreeNode {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<BackendNodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub ignored: bool,
    /// `(name, value)` pairs in host order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<(String, String)>,
    /// Indices into [`AxTree::nodes`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<usize>,
}

impl AxTreeNode {
    fn from_host(node: &AxNode) -> Self {
        let text = |v: &Option<AxValue>| {
            v.as_ref()
                .and_then(|v| v.text())
                .filter(|s| !s.is_empty())
        };
        Self {
            node_id: node.node_id.clone(),
            backend_node_id: node.backend_dom_node_id,
            role: text(&node.role),
            name: text(&node.name),
            description: text(&node.description),
            value: text(&node.value),
            ignored: node.ignored,
            properties: node
                .properties
                .iter()
                .filter_map(|AxProperty { name, value }| {
                    value.text().map(|v| (name.clone(), v))
                })
                .collect(),
            children: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn is_interactive(&self) -> bool {
        !self.ignored
            && self.property("focusable") == Some("true")
            && self.role.as_deref() != Some(ROOT_ROLE)
    }

    fn render_line(&self, depth: usize, out: &mut String) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&"\t".repeat(depth));
        let id = self
            .backend_node_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "- [{}] \"{}\"",
            id,
            self.name.as_deref().unwrap_or("<null>")
        ));
        if let Some(role) = &self.role {
            out.push_str(&format!(" ({})", role));
        }
        if let Some(desc) = &self.description {
            out.push_str(&format!(" ({})", desc));
        }
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect();
            out.push_str(&format!(" {{{}}}", props.join(", ")));
        }
        if let Some(value) = &self.value {
            out.push_str(&format!(" with value {}", value));
        }
    }
}

/// The accessibility tree of one page.
///
/// Nodes live in one flat list in document order (pre-order); nesting is
/// expressed through indices, so page depth never turns into call depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AxTree {
    /// Indices of the top-level nodes.
    pub roots: Vec<usize>,
    pub nodes: Vec<AxTreeNode>,
}

impl AxTree {
    /// Rebuild nesting from the host's flat node list.
    ///
    /// Nodes no other node claims as a child become roots, in host order.
    /// A node is placed at most once, which also cuts cycles.
    pub fn from_nodes(nodes: &[AxNode]) -> Self {
        let by_id: HashMap<&str, &AxNode> =
            nodes.iter().map(|n| (n.node_id.as_str(), n)).collect();

        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut linked: HashSet<(&str, &str)> = HashSet::new();
        for node in nodes {
            let parent = node.node_id.as_str();
            let list = children.entry(parent).or_default();
            for child in &node.child_ids {
                let child = child.as_str();
                if by_id.contains_key(child) && linked.insert((parent, child)) {
                    list.push(child);
                }
            }
        }
        // Nodes that only name their parent.
        for node in nodes {
            if let Some(parent) = node.parent_id.as_deref() {
                let child = node.node_id.as_str();
                if by_id.contains_key(parent) && linked.insert((parent, child)) {
                    children.entry(parent).or_default().push(child);
                }
            }
        }

        let claimed: HashSet<&str> = linked
            .iter()
            .filter(|(parent, child)| parent != child)
            .map(|(_, child)| *child)
            .collect();

        let mut tree = AxTree::default();
        let mut placed = HashSet::new();
        let unclaimed = nodes
            .iter()
            .filter(|n| !claimed.contains(n.node_id.as_str()));
        // Whatever the first pass leaves hangs off a cycle with no entry point.
        for node in unclaimed.chain(nodes) {
            tree.place(node.node_id.as_str(), &by_id, &children, &mut placed);
        }
        tree
    }

    /// Append the subtree under `root` in pre-order, skipping placed nodes.
    fn place<'n>(
        &mut self,
        root: &'n str,
        by_id: &HashMap<&'n str, &'n AxNode>,
        children: &HashMap<&'n str, Vec<&'n str>>,
        placed: &mut HashSet<&'n str>,
    ) {
        let mut stack: Vec<(&str, Option<usize>)> = vec![(root, None)];
        while let Some((id, parent)) = stack.pop() {
            if !placed.insert(id) {
                continue;
            }
            let Some(host) = by_id.get(id) else {
                continue;
            };
            let index = self.push(AxTreeNode::from_host(host), parent);
            if let Some(kids) = children.get(id) {
                stack.extend(kids.iter().rev().map(|kid| (*kid, Some(index))));
            }
        }
    }

    fn push(&mut self, node: AxTreeNode, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        match parent {
            Some(parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_nodes(&self) -> impl Iterator<Item = &AxTreeNode> {
        self.roots.iter().map(|i| &self.nodes[*i])
    }

    pub fn children<'t>(&'t self, node: &'t AxTreeNode) -> impl Iterator<Item = &'t AxTreeNode> {
        node.children.iter().map(|i| &self.nodes[*i])
    }

    /// Only focusable, non-ignored, non-root nodes. Children of dropped nodes
    /// take their place. The `focusable` property is removed from kept nodes.
    pub fn interactive(&self) -> AxTree {
        let mut out = AxTree::default();
        let mut stack: Vec<(usize, Option<usize>)> =
            self.roots.iter().rev().map(|i| (*i, None)).collect();
        while let Some((index, kept_parent)) = stack.pop() {
            let node = &self.nodes[index];
            let parent = if node.is_interactive() {
                let mut kept = node.clone();
                kept.children.clear();
                kept.properties.retain(|(k, _)| k != "focusable");
                Some(out.push(kept, kept_parent))
            } else {
                kept_parent
            };
            stack.extend(node.children.iter().rev().map(|child| (*child, parent)));
        }
        out
    }

    /// Backend node ids referenced by the tree, in document order.
    pub fn backend_node_ids(&self) -> Vec<BackendNodeId> {
        self.nodes.iter().filter_map(|n| n.backend_node_id).collect()
    }

    /// First node (document order) matching `pred`.
    pub fn find(&self, pred: impl Fn(&AxTreeNode) -> bool) -> Option<&AxTreeNode> {
        self.nodes.iter().find(|&n| pred(n))
    }

    /// Compact text form, one node per line, indented by depth with tabs.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|i| (*i, 0)).collect();
        while let Some((index, depth)) = stack.pop() {
            let node = &self.nodes[index];
            node.render_line(depth, &mut out);
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }
        out
    }
}

/// Reads the accessibility tree. Has no effect on DOM-domain state and works
/// whether or not the DOM domain is enabled.
pub struct AccessibilitySnapshot<'a> {
    dispatcher: &'a CommandDispatcher,
}

impl<'a> AccessibilitySnapshot<'a> {
    pub fn new(dispatcher: &'a CommandDispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn get_tree(&self, session: &DebuggerSession) -> Result<AxTree> {
        let response = self.dispatcher.send(session, GetFullAxTree {}).await?;
        Ok(AxTree::from_nodes(&response.nodes))
    }
}
