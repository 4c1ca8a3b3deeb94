use std::fmt;

use serde::{Deserialize, Serialize};

use super::runtime::{RemoteObject, RemoteObjectId};
use super::{Command, Empty};

/// Node id as reported by accessibility and DOM snapshots. Stable while the
/// node exists, but not guaranteed across navigations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendNodeId(pub i64);

impl fmt::Display for BackendNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a node pushed into the host's live node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl NodeId {
    /// `0` is how the host says "not in the document".
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Enable {}

impl Command for Enable {
    const METHOD: &'static str = "DOM.enable";
    type Response = Empty;
}

#[derive(Debug, Clone, Serialize)]
pub struct Disable {}

impl Command for Disable {
    const METHOD: &'static str = "DOM.disable";
    type Response = Empty;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveNode {
    pub backend_node_id: BackendNodeId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveNodeResponse {
    pub object: RemoteObject,
}

impl Command for ResolveNode {
    const METHOD: &'static str = "DOM.resolveNode";
    type Response = ResolveNodeResponse;
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pierce: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    pub node_id: NodeId,
    #[serde(default)]
    pub backend_node_id: Option<BackendNodeId>,
    #[serde(default)]
    pub node_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetDocumentResponse {
    pub root: DocumentNode,
}

impl Command for GetDocument {
    const METHOD: &'static str = "DOM.getDocument";
    type Response = GetDocumentResponse;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestNode {
    pub object_id: RemoteObjectId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestNodeResponse {
    pub node_id: NodeId,
}

impl Command for RequestNode {
    const METHOD: &'static str = "DOM.requestNode";
    type Response = RequestNodeResponse;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAttributes {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetAttributesResponse {
    /// Interleaved `[name, value, name, value, ...]`.
    pub attributes: Vec<String>,
}

impl GetAttributesResponse {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .chunks_exact(2)
            .find(|pair| pair[0] == name)
            .map(|pair| pair[1].as_str())
    }
}

impl Command for GetAttributes {
    const METHOD: &'static str = "DOM.getAttributes";
    type Response = GetAttributesResponse;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAttributeValue {
    pub node_id: NodeId,
    pub name: String,
    pub value: String,
}

impl Command for SetAttributeValue {
    const METHOD: &'static str = "DOM.setAttributeValue";
    type Response = Empty;
}
