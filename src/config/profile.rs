use serde::{Deserialize, Serialize};

/// Where to find the browser for a profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Local remote-debugging port
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,

    /// Explicit endpoint (ws:// or http:// URL); takes precedence over the port
    pub cdp_url: Option<String>,
}

fn default_cdp_port() -> u16 {
    9222
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            cdp_port: default_cdp_port(),
            cdp_url: None,
        }
    }
}

impl ProfileConfig {
    pub fn with_cdp_port(port: u16) -> Self {
        Self {
            cdp_port: port,
            ..Default::default()
        }
    }

    pub fn remote(cdp_url: String) -> Self {
        Self {
            cdp_url: Some(cdp_url),
            ..Default::default()
        }
    }

    pub fn is_remote(&self) -> bool {
        self.cdp_url.is_some()
    }

    /// Endpoint string accepted by `resolve_endpoint`.
    pub fn endpoint(&self) -> String {
        match &self.cdp_url {
            Some(url) => url.clone(),
            None => self.cdp_port.to_string(),
        }
    }
}
