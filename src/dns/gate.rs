use std::fmt;
use std::net::Ipv4Addr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use super::{ResolveStatus, Resolver};
use crate::config::Timings;

/// Result of passing through the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The hostname resolved
    Resolved(Ipv4Addr),
    /// Resolution was skipped, failed, timed out or was cancelled; carries
    /// the configured literal address
    Fallback(Option<Ipv4Addr>),
}

impl Lookup {
    /// Address to use for this cycle
    pub const fn address(self) -> Option<Ipv4Addr> {
        match self {
            Self::Resolved(addr) => Some(addr),
            Self::Fallback(addr) => addr,
        }
    }

    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

type Answer = Receiver<Option<Ipv4Addr>>;

/// Outcome of waiting on a pending resolution
enum Wait {
    Done(Option<Ipv4Addr>),
    /// Timed out or cancelled; the request may still complete later
    Abandoned,
}

/// Allows at most one resolution in flight across all sockets
///
/// A request abandoned on timeout or cancel stays with the gate. The next
/// holder waits for it to finish before asking the resolver again, so a slow
/// resolver never runs two lookups at once.
pub struct DnsGate {
    outstanding: Mutex<Option<Answer>>,
    resolver: Arc<dyn Resolver>,
    poll_interval: Duration,
    timeout: Duration,
}

impl fmt::Debug for DnsGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsGate")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DnsGate {
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>, timings: &Timings) -> Self {
        Self::with_intervals(resolver, timings.dns_poll_interval, timings.dns_timeout)
    }

    #[must_use]
    pub fn with_intervals(
        resolver: Arc<dyn Resolver>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            outstanding: Mutex::new(None),
            resolver,
            poll_interval,
            timeout,
        }
    }

    /// Resolve `host` on behalf of socket `owner`, falling back to `fallback`
    ///
    /// Blocks while another socket holds the gate. A pending resolution is
    /// polled every poll interval until it completes, the timeout passes, or
    /// `is_active` turns false. The timeout also covers waiting out a request
    /// an earlier holder abandoned.
    pub fn resolve<F>(&self, owner: &str, host: &str, fallback: Option<Ipv4Addr>, is_active: F) -> Lookup
    where
        F: Fn() -> bool,
    {
        if host.is_empty() {
            return Lookup::Fallback(fallback);
        }

        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        if let Some(previous) = outstanding.take() {
            info!("Socket {} wait for abandoned resolve before URL {}", owner, host);
            if let Wait::Abandoned = self.wait(owner, host, &previous, started, &is_active) {
                *outstanding = Some(previous);
                return self.fall_back(owner, host, fallback);
            }
        }

        info!("Socket {} start resolve URL {}", owner, host);
        let (tx, rx) = mpsc::channel();
        let status = self.resolver.resolve(
            host,
            Box::new(move |addr| {
                let _ = tx.send(addr);
            }),
        );

        let resolved = match status {
            ResolveStatus::Resolved(addr) => {
                info!("Socket {} resolved from cache URL {} to {}", owner, host, addr);
                Some(addr)
            }
            ResolveStatus::Failed => None,
            ResolveStatus::Pending => match self.wait(owner, host, &rx, started, &is_active) {
                Wait::Done(addr) => {
                    if let Some(addr) = addr {
                        info!(
                            "Socket {} resolved (just now for {} ms) URL {} to {}",
                            owner,
                            started.elapsed().as_millis(),
                            host,
                            addr
                        );
                    }
                    addr
                }
                Wait::Abandoned => {
                    *outstanding = Some(rx);
                    None
                }
            },
        };

        match resolved {
            Some(addr) => Lookup::Resolved(addr),
            None => self.fall_back(owner, host, fallback),
        }
    }

    /// Whether a request abandoned by an earlier holder has not finished yet
    pub fn has_outstanding(&self) -> bool {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn wait<F>(&self, owner: &str, host: &str, answer: &Answer, started: Instant, is_active: &F) -> Wait
    where
        F: Fn() -> bool,
    {
        loop {
            if !is_active() {
                warn!("Socket {} stopped while resolving URL {}", owner, host);
                return Wait::Abandoned;
            }
            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    "Socket {} resolve URL {} timed out after {} ms",
                    owner,
                    host,
                    elapsed.as_millis()
                );
                return Wait::Abandoned;
            }
            let wait = self.poll_interval.min(self.timeout - elapsed);
            match answer.recv_timeout(wait) {
                Ok(addr) => return Wait::Done(addr),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Wait::Done(None),
            }
        }
    }

    fn fall_back(&self, owner: &str, host: &str, fallback: Option<Ipv4Addr>) -> Lookup {
        error!(
            "Socket {} fail resolve URL {} - use default IP: {}",
            owner,
            host,
            fallback.map_or_else(|| "none".to_string(), |ip| ip.to_string())
        );
        Lookup::Fallback(fallback)
    }
}
