//! Supervised sockets: configuration, callbacks, the per-connection I/O
//! pump and the lifecycle loop that owns the OS handles.

mod connection;
mod descriptor;
mod handle;
mod hooks;
mod identify;
pub(crate) mod lifecycle;
mod link;
mod pump;

pub use connection::{ConnState, ConnectionSet};
pub use descriptor::{Behavior, SocketConfig, SocketConfigBuilder, MAX_NAME_LEN};
pub use handle::{SocketHandle, SocketInfo, SocketRegistry, SocketReport, SocketShared};
pub use hooks::{NoHooks, SocketHooks};
pub use identify::{answer as identification_answer, parse_request, Request};
pub use link::{Link, OsLink};
pub use pump::{normalize_line_endings, Verdict};
