//! Hostname resolution: the resolver collaborator and the gate that
//! serializes access to it across every socket.

mod gate;
mod resolver;

pub use gate::{DnsGate, Lookup};
pub use resolver::SystemResolver;

use std::net::Ipv4Addr;

/// Completion callback; receives `None` when resolution failed
pub type ResolveCallback = Box<dyn FnOnce(Option<Ipv4Addr>) + Send + 'static>;

/// Immediate outcome of a resolution request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// Answer available right away (cache hit); the callback is not invoked
    Resolved(Ipv4Addr),
    /// The callback will be invoked later
    Pending,
    /// The request could not be issued; the callback is not invoked
    Failed,
}

/// Non-reentrant name resolution engine
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, done: ResolveCallback) -> ResolveStatus;
}
