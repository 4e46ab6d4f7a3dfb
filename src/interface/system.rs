use std::net::{Ipv4Addr, SocketAddrV4};

use log::debug;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

use super::Adapter;
use crate::types::MacAddress;
use crate::{Error, Result};

/// Adapter backed by a host network interface (`eth0`, `wlan0`, `lo`, ...)
///
/// Every query reads the live interface table, so link and address changes
/// are picked up by the next selector evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAdapter {
    name: String,
}

#[derive(Debug)]
struct Snapshot {
    present: bool,
    flags: InterfaceFlags,
    ipv4: Option<Ipv4Addr>,
    mac: Option<MacAddress>,
}

impl SystemAdapter {
    /// Wrap an interface by name without checking that it exists
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Wrap an interface by name, failing if the host does not have it
    ///
    /// # Errors
    /// Returns `InterfaceNotFound` if no interface has this name, or a system
    /// call error if the interface table cannot be read
    pub fn lookup(name: &str) -> Result<Self> {
        let found = getifaddrs()
            .map_err(|err| Error::from_errno("getifaddrs", err))?
            .any(|entry| entry.interface_name == name);
        if found {
            Ok(Self::new(name))
        } else {
            Err(Error::interface_not_found(name))
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            present: false,
            flags: InterfaceFlags::empty(),
            ipv4: None,
            mac: None,
        };
        let entries = match getifaddrs() {
            Ok(entries) => entries,
            Err(err) => {
                debug!("getifaddrs failed for {}: {}", self.name, err);
                return snapshot;
            }
        };

        for entry in entries.filter(|entry| entry.interface_name == self.name) {
            snapshot.present = true;
            snapshot.flags |= entry.flags;
            let Some(address) = entry.address else {
                continue;
            };
            if let Some(sin) = address.as_sockaddr_in() {
                snapshot.ipv4.get_or_insert(*SocketAddrV4::from(*sin).ip());
            }
            #[cfg(not(target_os = "linux"))]
            if let Some(bytes) = address.as_link_addr().and_then(|link| link.addr()) {
                snapshot.mac.get_or_insert(MacAddress::new(bytes));
            }
        }

        #[cfg(target_os = "linux")]
        if snapshot.present {
            snapshot.mac = read_sysfs_mac(&self.name);
        }

        snapshot
    }
}

#[cfg(target_os = "linux")]
fn read_sysfs_mac(name: &str) -> Option<MacAddress> {
    let path = std::path::Path::new("/sys/class/net").join(name).join("address");
    let text = std::fs::read_to_string(path).ok()?;
    text.trim().parse().ok()
}

impl Adapter for SystemAdapter {
    fn is_link_up(&self) -> bool {
        let snapshot = self.snapshot();
        snapshot.present
            && snapshot
                .flags
                .contains(InterfaceFlags::IFF_UP | InterfaceFlags::IFF_RUNNING)
    }

    fn mac_address(&self) -> Option<MacAddress> {
        self.snapshot().mac
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.snapshot().ipv4
    }
}
