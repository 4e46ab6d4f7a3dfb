//! Process-wide entry point: owns the registries and the DNS gate and
//! starts one supervision thread per named socket.

use std::fmt;
use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::config::{Limits, Timings};
use crate::dns::{DnsGate, Resolver, SystemResolver};
use crate::interface::AdapterSet;
use crate::socket::lifecycle::{Context, SocketLoop};
use crate::socket::{SocketConfig, SocketHandle, SocketHooks, SocketRegistry, SocketShared};
use crate::stream::{StreamBuffer, StreamRegistry};
use crate::types::FirmwareVersion;
use crate::{Error, Result};

/// Starts supervised sockets and lists them
///
/// Cloning is cheap; every clone shares the same registries and DNS gate.
#[derive(Clone)]
pub struct SocketManager {
    context: Context,
}

impl fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketManager")
            .field("sockets", &self.context.sockets.len())
            .field("streams", &self.context.streams.len())
            .field("limits", &self.context.limits)
            .finish_non_exhaustive()
    }
}

impl Default for SocketManager {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SocketManager {
    #[must_use]
    pub fn builder() -> SocketManagerBuilder {
        SocketManagerBuilder::default()
    }

    /// Start supervising `config` on its own thread
    ///
    /// # Errors
    /// - `DuplicateName` if a socket with that name is still registered
    /// - `RegistryFull` if the socket registry has no free slot
    /// - `Io` if the thread cannot be spawned
    pub fn start<H>(&self, config: SocketConfig, hooks: H) -> Result<SocketHandle>
    where
        H: SocketHooks + 'static,
    {
        let limits = &self.context.limits;
        let shared = Arc::new(SocketShared::new(
            config.name(),
            config.port(),
            config.kind(),
            config.max_connections(limits.max_connections),
            limits.stream_slack,
        ));
        if let Err(err) = self.context.sockets.register_unique(&shared) {
            error!("Socket {} not started: {}", config.name(), err);
            return Err(err);
        }

        let name = config.name().to_string();
        let task = SocketLoop::new(
            Arc::clone(&shared),
            config,
            Box::new(hooks),
            self.context.clone(),
        );
        match thread::Builder::new()
            .name(format!("socket_{name}"))
            .spawn(move || task.run())
        {
            Ok(thread) => {
                info!("Socket {} started", name);
                Ok(SocketHandle::new(shared, thread))
            }
            Err(err) => {
                error!("Socket {} task not created: {}", name, err);
                self.context.sockets.unregister(&shared);
                Err(Error::Io(err))
            }
        }
    }

    pub fn sockets(&self) -> &SocketRegistry {
        &self.context.sockets
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.context.streams
    }

    pub fn find_socket(&self, name: &str) -> Option<Arc<SocketShared>> {
        self.context.sockets.find(name)
    }

    pub fn find_stream(&self, name: &str) -> Option<Arc<StreamBuffer>> {
        self.context.streams.find(name)
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.context.adapters
    }

    pub const fn limits(&self) -> &Limits {
        &self.context.limits
    }

    pub const fn timings(&self) -> &Timings {
        &self.context.timings
    }

    pub const fn firmware_version(&self) -> FirmwareVersion {
        self.context.version
    }
}

/// Builder for [`SocketManager`]
pub struct SocketManagerBuilder {
    limits: Limits,
    timings: Timings,
    version: FirmwareVersion,
    adapters: AdapterSet,
    resolver: Arc<dyn Resolver>,
}

impl Default for SocketManagerBuilder {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timings: Timings::default(),
            version: FirmwareVersion::default(),
            adapters: AdapterSet::default(),
            resolver: Arc::new(SystemResolver::new()),
        }
    }
}

impl SocketManagerBuilder {
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Version reported in identification answers
    #[must_use]
    pub const fn firmware_version(mut self, version: FirmwareVersion) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    #[must_use]
    pub fn build(self) -> SocketManager {
        let gate = DnsGate::new(self.resolver, &self.timings);
        SocketManager {
            context: Context {
                adapters: self.adapters,
                gate: Arc::new(gate),
                streams: Arc::new(StreamRegistry::new("streams", self.limits.max_streams)),
                sockets: Arc::new(SocketRegistry::new("sockets", self.limits.max_sockets)),
                timings: self.timings,
                limits: self.limits,
                version: self.version,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::NoHooks;
    use std::sync::Barrier;

    #[test]
    fn registry_capacity_refuses_start() {
        // No adapter and no host: each loop creates an OS socket, finds no
        // target address and drops it again, so no peer is ever reached.
        let manager = SocketManager::builder()
            .limits(Limits::default().max_sockets(1))
            .build();
        let first = manager
            .start(SocketConfig::client("first", 9).build().unwrap(), NoHooks)
            .unwrap();
        let second = manager.start(SocketConfig::client("second", 9).build().unwrap(), NoHooks);
        assert!(matches!(second, Err(Error::RegistryFull { capacity: 1, .. })));
        assert_eq!(manager.sockets().len(), 1);
        drop(first);
        assert!(manager.sockets().is_empty());
    }

    #[test]
    fn concurrent_same_name_starts_once() {
        let manager = SocketManager::default();
        let barrier = Arc::new(Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let config = SocketConfig::client("racer", 9).build().unwrap();
                    barrier.wait();
                    manager.start(config, NoHooks)
                })
            })
            .collect();

        let outcomes: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        let started = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(started, 1);
        assert!(outcomes.iter().all(|outcome| match outcome {
            Ok(handle) => handle.name() == "racer",
            Err(err) => matches!(err, Error::DuplicateName { name } if name == "racer"),
        }));
        assert_eq!(manager.sockets().len(), 1);
    }

    #[test]
    fn duplicate_name_until_stopped() {
        let manager = SocketManager::default();
        let config = SocketConfig::client("twin", 9).build().unwrap();
        let mut first = manager.start(config.clone(), NoHooks).unwrap();
        assert!(matches!(
            manager.start(config.clone(), NoHooks),
            Err(Error::DuplicateName { ref name }) if name == "twin"
        ));
        first.stop();
        let again = manager.start(config, NoHooks).unwrap();
        assert_eq!(again.name(), "twin");
    }
}
