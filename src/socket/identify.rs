//! Identification handshake: `man mac` / `man ver` requests and the fixed
//! answer line carrying the hardware address and firmware version.

use crate::types::{FirmwareVersion, MacAddress};

pub const MAC_REQUEST: &[u8] = b"man mac";
pub const VERSION_REQUEST: &[u8] = b"man ver";

/// A recognized identification query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Mac,
    Version,
}

impl Request {
    /// Only the version query completes identification
    pub const fn completes(self) -> bool {
        matches!(self, Self::Version)
    }
}

/// Match a payload against the two queries by prefix
pub fn parse_request(data: &[u8]) -> Option<Request> {
    if data.starts_with(MAC_REQUEST) {
        Some(Request::Mac)
    } else if data.starts_with(VERSION_REQUEST) {
        Some(Request::Version)
    } else {
        None
    }
}

/// `AA:BB:..\rMAC:AA:BB:..\rVersion:M.m.BBBBB\r`
pub fn answer(mac: MacAddress, version: FirmwareVersion) -> String {
    format!("{mac:X}\rMAC:{mac:X}\rVersion:{version}\r")
}
