use serde::{Deserialize, Serialize};

use super::Command;

#[derive(Debug, Clone, Serialize)]
pub struct GetVersion {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetVersionResponse {
    pub protocol_version: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub user_agent: String,
}

impl Command for GetVersion {
    const METHOD: &'static str = "Browser.getVersion";
    type Response = GetVersionResponse;
}
