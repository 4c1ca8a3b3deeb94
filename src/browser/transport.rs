use async_trait::async_trait;
use serde_json::Value;

use crate::cdp::target::TabId;
use crate::cdp::ProtocolVersion;
use crate::error::Result;

/// Host side of the debugger: something that can attach to a tab and carry
/// raw CDP commands for it.
///
/// `send` must only succeed for tabs the transport is currently attached
/// to, returning `NodemarkError::Session` otherwise. Host-reported command
/// errors come back as `NodemarkError::Protocol`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attach(&self, tab: &TabId, version: &ProtocolVersion) -> Result<()>;

    async fn detach(&self, tab: &TabId) -> Result<()>;

    async fn send(&self, tab: &TabId, method: &str, params: Value) -> Result<Value>;

    /// Whether the host still holds a debugger attachment for `tab`. Hosts can
    /// end one on their own, e.g. when the tab closes.
    async fn is_attached(&self, tab: &TabId) -> bool;
}
