//! Network adapter collaborators and the per-socket interface selector.

mod selector;
mod system;

pub use selector::{AdapterSelector, Selection};
pub use system::SystemAdapter;

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::types::{InterfaceId, MacAddress};

/// Narrow view of a network adapter driver
#[cfg_attr(test, mockall::automock)]
pub trait Adapter: Send + Sync {
    /// Whether the link currently carries traffic
    fn is_link_up(&self) -> bool;

    /// Hardware address, if the adapter has one
    fn mac_address(&self) -> Option<MacAddress>;

    /// Current IPv4 address, if one is assigned
    fn ip_address(&self) -> Option<Ipv4Addr>;
}

/// Adapters known to the manager, keyed by interface id
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: BTreeMap<InterfaceId, Arc<dyn Adapter>>,
}

impl fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}

impl AdapterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the adapter for `id`
    #[must_use]
    pub fn with(mut self, id: InterfaceId, adapter: Arc<dyn Adapter>) -> Self {
        self.insert(id, adapter);
        self
    }

    pub fn insert(&mut self, id: InterfaceId, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(id, adapter);
    }

    pub fn get(&self, id: InterfaceId) -> Option<&Arc<dyn Adapter>> {
        self.adapters.get(&id)
    }

    pub fn contains(&self, id: InterfaceId) -> bool {
        self.adapters.contains_key(&id)
    }

    /// Unknown interfaces report the link as down
    pub fn is_link_up(&self, id: InterfaceId) -> bool {
        self.get(id).is_some_and(|adapter| adapter.is_link_up())
    }

    pub fn mac_address(&self, id: InterfaceId) -> Option<MacAddress> {
        self.get(id).and_then(|adapter| adapter.mac_address())
    }

    pub fn ip_address(&self, id: InterfaceId) -> Option<Ipv4Addr> {
        self.get(id).and_then(|adapter| adapter.ip_address())
    }

    /// Number of wired instances
    pub fn ethernet_count(&self) -> usize {
        self.adapters
            .keys()
            .filter(|id| matches!(id, InterfaceId::Ethernet(_)))
            .count()
    }

    pub fn ids(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.adapters.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// In-memory adapter whose state is set by hand
#[derive(Debug)]
pub struct StaticAdapter {
    link_up: AtomicBool,
    mac: MacAddress,
    ip: Mutex<Option<Ipv4Addr>>,
}

impl StaticAdapter {
    #[must_use]
    pub fn new(mac: MacAddress, ip: Option<Ipv4Addr>) -> Self {
        Self {
            link_up: AtomicBool::new(true),
            mac,
            ip: Mutex::new(ip),
        }
    }

    /// Loopback adapter, link up, bound to 127.0.0.1
    #[must_use]
    pub fn loopback() -> Self {
        Self::new(MacAddress::default(), Some(Ipv4Addr::LOCALHOST))
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.store(up, Ordering::SeqCst);
    }

    pub fn set_ip(&self, ip: Option<Ipv4Addr>) {
        *self.ip.lock().unwrap_or_else(PoisonError::into_inner) = ip;
    }
}

impl Adapter for StaticAdapter {
    fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    fn mac_address(&self) -> Option<MacAddress> {
        Some(self.mac)
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        *self.ip.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
