use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodemarkError {
    /// No attached session for the tab, or the session is in the wrong state
    /// (for example DOM commands while the DOM domain is disabled).
    #[error("Session error: {0}")]
    Session(String),

    #[error("Attach failed for tab {tab}: {reason}")]
    Attach { tab: String, reason: String },

    /// The host rejected a command.
    #[error("Protocol error in {method}: {message}{}", code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Protocol {
        method: String,
        code: Option<i64>,
        message: String,
    },

    /// Identity resolution could not complete because the node (or the
    /// intermediate handle) is no longer valid.
    #[error("Stale node {backend_node_id}: {reason}")]
    StaleNode { backend_node_id: i64, reason: String },

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptError(String),

    #[error("CDP connection failed: {0}")]
    CdpConnectionFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl NodemarkError {
    pub fn is_session_error(&self) -> bool {
        matches!(self, NodemarkError::Session(_))
    }

    pub fn is_attach_error(&self) -> bool {
        matches!(self, NodemarkError::Attach { .. })
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, NodemarkError::Protocol { .. })
    }

    pub fn is_stale_node(&self) -> bool {
        matches!(self, NodemarkError::StaleNode { .. })
    }

    pub fn is_element_not_found(&self) -> bool {
        matches!(self, NodemarkError::ElementNotFound(_))
    }

    /// True for host rejections that mean the addressed node no longer exists.
    pub(crate) fn is_missing_node(&self) -> bool {
        match self {
            NodemarkError::Protocol { message, .. } => {
                let message = message.to_ascii_lowercase();
                (message.contains("node") || message.contains("object"))
                    && (message.contains("not find")
                        || message.contains("not found")
                        || message.contains("no node")
                        || message.contains("detached"))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodemarkError>;
