#![allow(clippy::uninlined_format_args)]

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum SocketState {
    /// No OS socket exists
    #[default]
    Idle,
    /// OS socket exists but is not bound/connected yet
    Created,
    /// Serving I/O
    Connected,
    /// The selected interface is administratively denied
    Denied,
}

impl SocketState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Created => 1,
            Self::Connected => 2,
            Self::Denied => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Created,
            2 => Self::Connected,
            3 => Self::Denied,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Created => write!(f, "CREATED"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Denied => write!(f, "DENIED"),
        }
    }
}

/// Transport type of a supervised socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum SocketKind {
    /// TCP
    Stream,
    /// UDP
    Datagram,
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "TCP"),
            Self::Datagram => write!(f, "UDP"),
        }
    }
}

/// Whether the socket accepts connections or initiates one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum Role {
    Server,
    Client,
}

/// Identifies a network path a socket can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum InterfaceId {
    /// Wireless station link
    WifiStation,
    /// Wireless soft access point link
    WifiAccessPoint,
    /// Wired link, one per Ethernet instance
    Ethernet(u8),
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiStation => write!(f, "Wifi Station"),
            Self::WifiAccessPoint => write!(f, "Wifi Soft-AP"),
            Self::Ethernet(index) => write!(f, "EthernetLAN{}", index),
        }
    }
}

/// Which interface wins when both default and backup are reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum Priority {
    #[default]
    Default,
    Backup,
}

/// Hardware address of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Colon separated upper-case hex, as sent in identification answers
impl fmt::UpperHex for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(crate::Error::config_error(format!("invalid MAC address {s}")));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| crate::Error::config_error(format!("invalid MAC address {s}")))?;
        }

        Ok(Self(bytes))
    }
}

/// Firmware version reported by the identification answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u32,
}

impl FirmwareVersion {
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Version of this crate, used when the application does not set one
    #[must_use]
    pub fn from_pkg() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            build: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
        }
    }
}

impl Default for FirmwareVersion {
    fn default() -> Self {
        Self::from_pkg()
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{:05}", self.major, self.minor, self.build)
    }
}

/// Broadcast heuristic: any IPv4 octet equal to 255
#[must_use]
pub fn is_broadcast_like(addr: Ipv4Addr) -> bool {
    addr.octets().iter().any(|&octet| octet == 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_formats_lower_and_upper() {
        let mac = MacAddress::new([0x24, 0x0a, 0xc4, 0x01, 0xab, 0xff]);
        assert_eq!(mac.to_string(), "24:0a:c4:01:ab:ff");
        assert_eq!(format!("{:X}", mac), "24:0A:C4:01:AB:FF");
        assert_eq!("24:0a:c4:01:ab:ff".parse::<MacAddress>().unwrap(), mac);
        assert!("24:0a:c4".parse::<MacAddress>().is_err());
    }

    #[test]
    fn version_pads_build() {
        assert_eq!(FirmwareVersion::new(2, 7, 42).to_string(), "2.7.00042");
    }

    #[test]
    fn broadcast_heuristic_checks_every_octet() {
        assert!(is_broadcast_like(Ipv4Addr::BROADCAST));
        assert!(is_broadcast_like(Ipv4Addr::new(192, 168, 3, 255)));
        assert!(is_broadcast_like(Ipv4Addr::new(255, 0, 0, 1)));
        assert!(is_broadcast_like(Ipv4Addr::new(10, 255, 1, 1)));
        assert!(!is_broadcast_like(Ipv4Addr::new(192, 168, 3, 118)));
        assert!(!is_broadcast_like(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn state_round_trips_through_atomic_repr() {
        for state in [
            SocketState::Idle,
            SocketState::Created,
            SocketState::Connected,
            SocketState::Denied,
        ] {
            assert_eq!(SocketState::from_u8(state.as_u8()), state);
        }
    }
}
