mod connection;
mod controller;
mod dispatcher;
pub mod fake_host;
mod interaction;
mod resolver;
mod session;
mod snapshot;
mod transport;

pub use connection::{resolve_endpoint, CdpConnection};
pub use controller::Controller;
pub use dispatcher::CommandDispatcher;
pub use fake_host::{FakeElement, FakeHost, FakePage};
pub use interaction::{PageAction, PageInteraction};
pub use resolver::{
    NodeResolver, ResolvedSelector, SelectorMarker, MARKER_ATTRIBUTE, MAX_MARKER_TOKENS,
};
pub use session::{DebuggerSession, SessionManager, SessionState};
pub use snapshot::{AccessibilitySnapshot, AxTree, AxTreeNode};
pub use transport::Transport;
