use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::dom::BackendNodeId;
use super::Command;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GetFullAxTree {}

#[derive(Debug, Clone, Deserialize)]
pub struct GetFullAxTreeResponse {
    pub nodes: Vec<AxNode>,
}

impl Command for GetFullAxTree {
    const METHOD: &'static str = "Accessibility.getFullAXTree";
    type Response = GetFullAxTreeResponse;
}

/// Flat accessibility node as the host reports it. Children are referenced
/// by id; `browser::snapshot` rebuilds the nesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxNode {
    pub node_id: String,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<AxValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<AxValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<AxValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AxValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<AxProperty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
    #[serde(
        rename = "backendDOMNodeId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub backend_dom_node_id: Option<BackendNodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxValue {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl AxValue {
    pub fn string(value_type: &str, value: &str) -> Self {
        Self {
            value_type: value_type.to_string(),
            value: Some(Value::String(value.to_string())),
        }
    }

    /// The value as display text. Strings are unquoted, other JSON is printed.
    pub fn text(&self) -> Option<String> {
        match &self.value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxProperty {
    pub name: String,
    pub value: AxValue,
}
