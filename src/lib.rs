//! Durable CSS selectors for live DOM nodes over the Chrome DevTools Protocol.
//!
//! An agent attaches a debugger session to a tab, reads the accessibility
//! tree, turns the backend node ids it is interested in into CSS selectors
//! (by tagging the nodes with a marker attribute), and then clicks, fills or
//! evaluates against those selectors.
//!
//! ```ignore
//! let connection = CdpConnection::connect_endpoint("9222").await?;
//! let controller = Controller::new(Arc::new(connection));
//! let tab = TabId::from("E3C5...");
//! controller.attach(&tab).await?;
//! let tree = controller.get_accessibility_tree(&tab).await?;
//! let selector = controller.resolve_selector(&tab, tree.backend_node_ids()[0]).await?;
//! controller.click(&tab, selector.as_str()).await?;
//! controller.detach(&tab).await;
//! ```

pub mod browser;
pub mod cdp;
pub mod config;
pub mod error;

pub use browser::{Controller, DebuggerSession, ResolvedSelector, SessionManager, Transport};
pub use cdp::dom::BackendNodeId;
pub use cdp::target::TabId;
pub use cdp::ProtocolVersion;
pub use error::{NodemarkError, Result};
