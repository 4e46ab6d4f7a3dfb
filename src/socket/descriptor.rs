use std::net::Ipv4Addr;

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

use crate::types::{InterfaceId, Priority, Role, SocketKind};
use crate::{Error, Result};

/// Longest accepted socket name, in bytes
pub const MAX_NAME_LEN: usize = 15;

/// Behavior flags of a supervised socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct Behavior {
    /// Set SO_BROADCAST on every connection
    pub permit_broadcast: bool,
    /// Hold outbound traffic until the peer queried identity (or timeout)
    pub identify_forced: bool,
    /// Empty the transmit buffer each time a connection comes up
    pub reset_send_on_connect: bool,
    /// Start sending right after connect when no identification is pending
    pub auto_send_enable: bool,
    /// Never read more than the receive buffer can hold
    pub prevent_recv_overflow: bool,
    /// Collapse `CR LF` and `LF CR` pairs into their first byte
    pub crlf_to_cr: bool,
    /// Send `ping_count N` after a quiet ping interval
    pub ping: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            permit_broadcast: false,
            identify_forced: false,
            reset_send_on_connect: true,
            auto_send_enable: true,
            prevent_recv_overflow: false,
            crlf_to_cr: false,
            ping: false,
        }
    }
}

/// Immutable description of one named socket
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct SocketConfig {
    name: String,
    port: u16,
    kind: SocketKind,
    role: Role,
    default_interface: InterfaceId,
    backup_interface: Option<InterfaceId>,
    priority: Priority,
    behavior: Behavior,
    url: Option<String>,
    host: Option<Ipv4Addr>,
    max_connections: Option<usize>,
    recv_stream_len: usize,
    send_stream_len: usize,
}

impl SocketConfig {
    /// Start describing a TCP server accepting on `port`
    #[must_use]
    pub fn server(name: impl Into<String>, port: u16) -> SocketConfigBuilder {
        SocketConfigBuilder::new(name.into(), port, Role::Server)
    }

    /// Start describing a client talking to `port` on the target host
    #[must_use]
    pub fn client(name: impl Into<String>, port: u16) -> SocketConfigBuilder {
        SocketConfigBuilder::new(name.into(), port, Role::Client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn kind(&self) -> SocketKind {
        self.kind
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub const fn is_server(&self) -> bool {
        matches!(self.role, Role::Server)
    }

    pub const fn default_interface(&self) -> InterfaceId {
        self.default_interface
    }

    pub const fn backup_interface(&self) -> Option<InterfaceId> {
        self.backup_interface
    }

    pub const fn priority(&self) -> Priority {
        self.priority
    }

    pub const fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Hostname to resolve before each connect attempt
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Literal host address used when the hostname does not resolve
    pub const fn host(&self) -> Option<Ipv4Addr> {
        self.host
    }

    /// Connection cap: the configured value for servers (or `fallback`), 1 for clients
    pub fn max_connections(&self, fallback: usize) -> usize {
        match self.role {
            Role::Server => self.max_connections.unwrap_or(fallback).max(1),
            Role::Client => 1,
        }
    }

    /// Receive and transmit buffer caps; 0 means the manager default
    pub const fn stream_lengths(&self) -> (usize, usize) {
        (self.recv_stream_len, self.send_stream_len)
    }
}

/// Consuming builder for [`SocketConfig`]
#[derive(Debug, Clone)]
#[must_use]
pub struct SocketConfigBuilder {
    config: SocketConfig,
}

impl SocketConfigBuilder {
    fn new(name: String, port: u16, role: Role) -> Self {
        Self {
            config: SocketConfig {
                name,
                port,
                kind: SocketKind::Stream,
                role,
                default_interface: InterfaceId::WifiStation,
                backup_interface: None,
                priority: Priority::Default,
                behavior: Behavior::default(),
                url: None,
                host: None,
                max_connections: None,
                recv_stream_len: 0,
                send_stream_len: 0,
            },
        }
    }

    pub const fn kind(mut self, kind: SocketKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub const fn datagram(self) -> Self {
        self.kind(SocketKind::Datagram)
    }

    pub const fn interfaces(mut self, default: InterfaceId, backup: Option<InterfaceId>) -> Self {
        self.config.default_interface = default;
        self.config.backup_interface = backup;
        self
    }

    pub const fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.config.url = (!url.is_empty()).then_some(url);
        self
    }

    pub const fn host(mut self, host: Ipv4Addr) -> Self {
        self.config.host = Some(host);
        self
    }

    pub const fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = Some(count);
        self
    }

    pub const fn stream_lengths(mut self, recv: usize, send: usize) -> Self {
        self.config.recv_stream_len = recv;
        self.config.send_stream_len = send;
        self
    }

    pub const fn behavior(mut self, behavior: Behavior) -> Self {
        self.config.behavior = behavior;
        self
    }

    pub const fn permit_broadcast(mut self, enabled: bool) -> Self {
        self.config.behavior.permit_broadcast = enabled;
        self
    }

    pub const fn identify_forced(mut self, enabled: bool) -> Self {
        self.config.behavior.identify_forced = enabled;
        self
    }

    pub const fn reset_send_on_connect(mut self, enabled: bool) -> Self {
        self.config.behavior.reset_send_on_connect = enabled;
        self
    }

    pub const fn auto_send_enable(mut self, enabled: bool) -> Self {
        self.config.behavior.auto_send_enable = enabled;
        self
    }

    pub const fn prevent_recv_overflow(mut self, enabled: bool) -> Self {
        self.config.behavior.prevent_recv_overflow = enabled;
        self
    }

    pub const fn crlf_to_cr(mut self, enabled: bool) -> Self {
        self.config.behavior.crlf_to_cr = enabled;
        self
    }

    pub const fn ping(mut self, enabled: bool) -> Self {
        self.config.behavior.ping = enabled;
        self
    }

    /// Validate and finish
    ///
    /// # Errors
    /// Returns a configuration error for an empty or over-long name, a
    /// datagram server, a zero connection cap, or a backup interface equal
    /// to the default one
    pub fn build(self) -> Result<SocketConfig> {
        let config = self.config;

        if config.name.is_empty() {
            return Err(Error::config_error("socket name is empty"));
        }
        if config.name.len() > MAX_NAME_LEN {
            return Err(Error::config_error(format!(
                "socket name '{}' is longer than {} bytes",
                config.name, MAX_NAME_LEN
            )));
        }
        if config.is_server() && config.kind != SocketKind::Stream {
            return Err(Error::config_error(format!(
                "socket '{}': a server must use the stream protocol",
                config.name
            )));
        }
        if config.max_connections == Some(0) {
            return Err(Error::config_error(format!(
                "socket '{}': max connections must be at least 1",
                config.name
            )));
        }
        if config.backup_interface == Some(config.default_interface) {
            return Err(Error::config_error(format!(
                "socket '{}': backup interface {} equals the default",
                config.name, config.default_interface
            )));
        }

        Ok(config)
    }
}
