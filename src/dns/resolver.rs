use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::thread;

use log::{debug, warn};

use super::{ResolveCallback, ResolveStatus, Resolver};

/// Resolver backed by the host's `getaddrinfo`
///
/// IPv4 literals are answered immediately. Anything else is looked up on a
/// helper thread and reported through the callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl SystemResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn lookup(host: &str) -> Option<Ipv4Addr> {
        match (host, 0).to_socket_addrs() {
            Ok(addrs) => addrs.into_iter().find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            }),
            Err(err) => {
                debug!("getaddrinfo({}) failed: {}", host, err);
                None
            }
        }
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, done: ResolveCallback) -> ResolveStatus {
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return ResolveStatus::Resolved(addr);
        }

        let owned = host.to_string();
        let spawned = thread::Builder::new()
            .name("dns_lookup".to_string())
            .spawn(move || done(Self::lookup(&owned)));

        match spawned {
            Ok(_) => ResolveStatus::Pending,
            Err(err) => {
                warn!("Cannot start lookup of {}: {}", host, err);
                ResolveStatus::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn literal_is_immediate() {
        let status = SystemResolver::new().resolve("192.168.4.1", Box::new(|_| {}));
        assert_eq!(status, ResolveStatus::Resolved(Ipv4Addr::new(192, 168, 4, 1)));
    }

    #[test]
    fn localhost_resolves_through_callback() {
        let (tx, rx) = mpsc::channel();
        let status = SystemResolver::new().resolve(
            "localhost",
            Box::new(move |addr| {
                let _ = tx.send(addr);
            }),
        );
        assert_eq!(status, ResolveStatus::Pending);
        let addr = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("lookup finishes");
        assert!(addr.is_some_and(|addr| addr.is_loopback()));
    }
}
