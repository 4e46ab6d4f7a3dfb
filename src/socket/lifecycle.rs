//! The per-socket supervision loop.
//!
//! Each iteration selects an interface, honors disconnect and deny requests,
//! then either serves the live connections, creates an OS socket, or tries
//! to connect it. The loop owns every OS handle; owners talk to it through
//! [`SocketShared`] flags only.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use nix::errno::Errno;
use socket2::Socket;

use super::connection::{ConnState, ConnectionSet};
use super::descriptor::SocketConfig;
use super::handle::{SocketRegistry, SocketShared};
use super::hooks::SocketHooks;
use super::link::{self, Link, OsLink};
use super::pump::{Pump, Verdict};
use crate::config::{Limits, Timings};
use crate::dns::DnsGate;
use crate::error::errno_text;
use crate::interface::{AdapterSelector, AdapterSet};
use crate::stream::StreamRegistry;
use crate::types::{is_broadcast_like, FirmwareVersion, InterfaceId, SocketKind, SocketState};

const LISTEN_BACKLOG: i32 = 8;

/// Process-wide collaborators every socket loop shares
#[derive(Clone)]
pub(crate) struct Context {
    pub adapters: AdapterSet,
    pub gate: Arc<DnsGate>,
    pub streams: Arc<StreamRegistry>,
    pub sockets: Arc<SocketRegistry>,
    pub timings: Timings,
    pub limits: Limits,
    pub version: FirmwareVersion,
}

struct Connection {
    link: OsLink,
    state: ConnState,
}

/// How a failed `accept` affects the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// Out of descriptors or buffers: skip accepting this iteration
    Exhausted,
    /// Only the pending client is lost
    Connection,
}

impl AcceptFailure {
    fn classify(err: &io::Error) -> Self {
        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM) => Self::Exhausted,
            _ => Self::Connection,
        }
    }
}

fn close(name: &str, index: usize, mut link: OsLink) {
    let handle = link.os_handle();
    match link.shutdown() {
        Ok(()) => info!("Socket {}[{}] {} closed", name, index, handle),
        Err(err) if err.kind() == io::ErrorKind::NotConnected => {
            info!("Socket {}[{}] {} closed by peer", name, index, handle);
        }
        Err(err) => warn!(
            "Socket {}[{}] {} shutdown failed: {}",
            name,
            index,
            handle,
            errno_text(&err)
        ),
    }
}

pub(crate) struct SocketLoop {
    shared: Arc<SocketShared>,
    config: SocketConfig,
    hooks: Box<dyn SocketHooks>,
    context: Context,
    selector: AdapterSelector,
    interface: Option<InterfaceId>,
    unbound: Option<Socket>,
    listener: Option<TcpListener>,
    connections: ConnectionSet<Connection>,
    connected: bool,
    broadcast: bool,
    local_ip: Ipv4Addr,
    default_target: Option<SocketAddrV4>,
    send_ready: Vec<bool>,
}

impl SocketLoop {
    pub(crate) fn new(
        shared: Arc<SocketShared>,
        config: SocketConfig,
        hooks: Box<dyn SocketHooks>,
        context: Context,
    ) -> Self {
        let max = config.max_connections(context.limits.max_connections);
        let selector = AdapterSelector::new(
            config.default_interface(),
            config.backup_interface(),
            config.priority(),
        );
        Self {
            shared,
            config,
            hooks,
            context,
            selector,
            interface: None,
            unbound: None,
            listener: None,
            connections: ConnectionSet::new(max),
            connected: false,
            broadcast: false,
            local_ip: Ipv4Addr::UNSPECIFIED,
            default_target: None,
            send_ready: vec![false; max],
        }
    }

    fn name(&self) -> &str {
        self.shared.name()
    }

    fn has_handles(&self) -> bool {
        self.unbound.is_some() || self.listener.is_some() || !self.connections.is_empty()
    }

    /// Run until the owner deactivates the socket, then tear down
    pub(crate) fn run(mut self) {
        info!(
            "Socket {} task started: {} {:?} port {}",
            self.name(),
            self.config.kind(),
            self.config.role(),
            self.config.port()
        );
        while self.shared.is_active() {
            self.iterate();
            self.shared.tick();
            thread::sleep(self.context.timings.rest_interval);
        }
        self.teardown();
    }

    fn iterate(&mut self) {
        let adapters = &self.context.adapters;
        let selection = self
            .selector
            .evaluate(self.interface, |interface| adapters.is_link_up(interface));
        if self.interface != Some(selection.interface) {
            info!("Socket {} use interface {}", self.name(), selection.interface);
            self.interface = Some(selection.interface);
            self.shared.set_interface(self.interface);
        }
        if selection.disconnect && self.has_handles() {
            self.shared.request_disconnect();
        }

        if self.has_handles() && self.shared.take_disconnect_request() {
            info!("Socket {} disconnect requested", self.name());
            self.disconnect();
        }

        if self.shared.is_denied(selection.interface) {
            if self.has_handles() {
                self.shared.request_disconnect();
            }
            self.shared.set_state(SocketState::Denied);
            self.shared.set_connection_count(self.connections.len());
            return;
        }

        if self.connected {
            self.serve();
        } else if !self.has_handles() {
            self.create();
        } else {
            self.connect();
        }
        self.publish();
    }

    fn publish(&self) {
        let state = if self.connected {
            SocketState::Connected
        } else if self.has_handles() {
            SocketState::Created
        } else {
            SocketState::Idle
        };
        self.shared.set_state(state);
        self.shared.set_connection_count(self.connections.len());
    }

    fn serve(&mut self) {
        let mac = self
            .interface
            .and_then(|interface| self.context.adapters.mac_address(interface))
            .unwrap_or_default();
        let pump = Pump {
            name: self.shared.name(),
            kind: self.config.kind(),
            behavior: self.config.behavior(),
            timings: &self.context.timings,
            limits: &self.context.limits,
            broadcast: self.broadcast,
            mac,
            version: self.context.version,
            default_target: self.default_target,
            identify_mac: self.shared.identify_mac_slot(),
        };

        let mut index = 0;
        while let Some(conn) = self.connections.get_mut(index) {
            let (Some(rx), Some(tx)) = (self.shared.recv_stream(index), self.shared.send_stream(index))
            else {
                break;
            };
            let mut verdict =
                pump.receive(index, &mut conn.link, &mut conn.state, rx, &mut *self.hooks);
            if verdict == Verdict::Keep {
                verdict =
                    pump.transmit(index, &mut conn.link, &mut conn.state, tx, &mut *self.hooks);
            }
            if verdict == Verdict::Drop {
                if let Some(conn) = self.connections.remove(index) {
                    close(self.shared.name(), index, conn.link);
                }
                self.hooks.on_disconnect(index);
            } else {
                index += 1;
            }
        }

        if self.listener.is_some() {
            self.accept_periodic(TcpListener::accept);
        } else if self.connections.is_empty() {
            info!("Socket {} lost its connection", self.name());
            self.connected = false;
        }
    }

    /// Admit clients queued while already serving
    ///
    /// A failed accept is logged and leaves the listener and every admitted
    /// connection in place.
    fn accept_periodic<F>(&mut self, accept: F)
    where
        F: FnMut(&TcpListener) -> io::Result<(TcpStream, SocketAddr)>,
    {
        if let Err(err) = self.accept_with(accept) {
            self.log_accept_failure(&err);
        }
    }

    fn log_accept_failure(&self, err: &io::Error) {
        match AcceptFailure::classify(err) {
            AcceptFailure::Exhausted => warn!(
                "Socket {} out of resources, skip accept: {}",
                self.name(),
                errno_text(err)
            ),
            AcceptFailure::Connection => error!(
                "Socket {} accept failed: {}",
                self.name(),
                errno_text(err)
            ),
        }
    }

    /// Accept every queued client without blocking
    fn accept_with<F>(&mut self, mut accept: F) -> io::Result<usize>
    where
        F: FnMut(&TcpListener) -> io::Result<(TcpStream, SocketAddr)>,
    {
        let mut admitted = 0;
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return Ok(admitted);
            };
            match accept(listener) {
                Ok((stream, peer)) => {
                    if self.admit(OsLink::Tcp(stream), &peer.to_string()) {
                        admitted += 1;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(admitted),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn admit(&mut self, mut link: OsLink, peer: &str) -> bool {
        let handle = link.os_handle();
        if self.connections.is_full() {
            error!(
                "Socket {} reject {} (handle {}): all {} connections in use",
                self.name(),
                peer,
                handle,
                self.connections.max()
            );
            self.shared.count_rejected();
            if let Err(err) = link.shutdown() {
                debug!(
                    "Socket {} rejected handle {} shutdown failed: {}",
                    self.name(),
                    handle,
                    errno_text(&err)
                );
            }
            return false;
        }

        match link.prepare(self.config.behavior().permit_broadcast, &self.context.timings) {
            Ok(failures) => {
                for (option, err) in failures {
                    warn!(
                        "Socket {} cannot set {} on handle {}: {}",
                        self.name(),
                        option,
                        handle,
                        errno_text(&err)
                    );
                }
            }
            Err(err) => {
                error!(
                    "Socket {} cannot make handle {} non-blocking: {}",
                    self.name(),
                    handle,
                    errno_text(&err)
                );
                return false;
            }
        }

        let connection = Connection {
            link,
            state: ConnState::default(),
        };
        let Ok(index) = self.connections.add(connection) else {
            return false;
        };
        info!(
            "Socket {}[{}] {} connected to {}",
            self.name(),
            index,
            handle,
            peer
        );
        self.on_connect(index);
        true
    }

    fn on_connect(&mut self, index: usize) {
        let (recv_len, send_len) = self.config.stream_lengths();
        let default_len = self.context.limits.stream_max_len;
        let or_default = |len: usize| if len == 0 { default_len } else { len };

        if let Some(rx) = self.shared.recv_stream(index) {
            self.context.streams.init_stream(rx, or_default(recv_len));
        }
        if let Some(tx) = self.shared.send_stream(index) {
            let first_use = !self.send_ready.get(index).copied().unwrap_or(true);
            if first_use || self.config.behavior().reset_send_on_connect {
                self.context.streams.init_stream(tx, or_default(send_len));
            }
        }
        if let Some(ready) = self.send_ready.get_mut(index) {
            *ready = true;
        }

        let behavior = self.config.behavior();
        let state = ConnState::on_connect(behavior.identify_forced, behavior.auto_send_enable);
        if let Some(conn) = self.connections.get_mut(index) {
            conn.state = state;
        }
        self.hooks.on_connect(index);
    }

    fn drop_connection(&mut self, index: usize) {
        if let Some(conn) = self.connections.remove(index) {
            close(self.shared.name(), index, conn.link);
        }
        self.hooks.on_disconnect(index);
    }

    /// Drop every connection and close the OS socket
    fn disconnect(&mut self) {
        while !self.connections.is_empty() {
            self.drop_connection(0);
        }
        if let Some(listener) = self.listener.take() {
            info!("Socket {} stop listening", self.name());
            drop(listener);
        }
        if let Some(socket) = self.unbound.take() {
            debug!(
                "Socket {} close handle {}",
                self.name(),
                link::raw_handle(&socket)
            );
            drop(socket);
        }
        self.connected = false;
    }

    fn create(&mut self) {
        match link::create(self.config.kind()) {
            Ok(socket) => {
                info!(
                    "Socket {} created handle {}",
                    self.name(),
                    link::raw_handle(&socket)
                );
                self.unbound = Some(socket);
            }
            Err(err) => error!(
                "Socket {} cannot create {} socket: {}",
                self.name(),
                self.config.kind(),
                errno_text(&err)
            ),
        }
    }

    fn connect(&mut self) {
        let Some(interface) = self.interface else {
            return;
        };
        self.local_ip = if let Some(ip) = self.context.adapters.ip_address(interface) {
            ip
        } else {
            warn!(
                "Socket {} interface {} has no address, binding to any",
                self.name(),
                interface
            );
            Ipv4Addr::UNSPECIFIED
        };

        let shared = &self.shared;
        let lookup = self.context.gate.resolve(
            shared.name(),
            self.config.url().unwrap_or(""),
            self.config.host(),
            || shared.is_active(),
        );
        let target = lookup.address();
        self.broadcast =
            self.config.kind() == SocketKind::Datagram && target.is_some_and(is_broadcast_like);
        self.default_target = target.map(|ip| SocketAddrV4::new(ip, self.config.port()));

        let success = if self.config.is_server() {
            self.connect_server()
        } else {
            self.connect_client()
        };

        if success {
            info!(
                "Socket {} connected on {} ({} connections)",
                self.name(),
                interface,
                self.connections.len()
            );
            self.connected = true;
            self.shared.clear_disconnect_request();
        } else {
            self.pause(self.context.timings.reconnect_delay);
        }
    }

    fn connect_server(&mut self) -> bool {
        if self.listener.is_none() {
            let Some(socket) = self.unbound.take() else {
                return false;
            };
            let local = SocketAddrV4::new(self.local_ip, self.config.port());
            match link::listen(socket, local, LISTEN_BACKLOG) {
                Ok(listener) => {
                    info!("Socket {} listening on {}", self.name(), local);
                    self.listener = Some(listener);
                }
                Err(err) => {
                    error!(
                        "Socket {} cannot listen on {}: {}",
                        self.name(),
                        local,
                        errno_text(&err)
                    );
                    self.disconnect();
                    return false;
                }
            }
        }

        let started = Instant::now();
        while self.shared.is_active() {
            match self.accept_with(TcpListener::accept) {
                Ok(_) if !self.connections.is_empty() => return true,
                Ok(_) => {}
                Err(err) => {
                    // The listener stays open for the next attempt.
                    self.log_accept_failure(&err);
                    return false;
                }
            }
            if started.elapsed() >= self.context.timings.listen_accept_timeout {
                debug!("Socket {} no client within accept timeout", self.name());
                return false;
            }
            thread::sleep(self.context.timings.rest_interval);
        }
        false
    }

    fn connect_client(&mut self) -> bool {
        let Some(socket) = self.unbound.take() else {
            return false;
        };
        let port = self.config.port();
        let local_ip = self.local_ip;
        let result = match self.config.kind() {
            SocketKind::Stream => match self.default_target {
                Some(target) => link::connect_stream(
                    socket,
                    SocketAddrV4::new(local_ip, 0),
                    target,
                    self.context.timings.connect_timeout,
                ),
                None => Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no host address to connect to",
                )),
            },
            SocketKind::Datagram => {
                let target = if self.broadcast { None } else { self.default_target };
                if !self.broadcast && target.is_none() {
                    Err(io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        "no host address for datagrams",
                    ))
                } else {
                    link::bind_datagram(
                        socket,
                        SocketAddrV4::new(local_ip, port),
                        target,
                        self.config.behavior().permit_broadcast,
                    )
                }
            }
        };

        match result {
            Ok(link) => {
                let peer = self
                    .default_target
                    .map_or_else(|| "nobody".to_string(), |target| target.to_string());
                self.admit(link, &peer)
            }
            Err(err) => {
                error!(
                    "Socket {} cannot connect to {:?}: {}",
                    self.name(),
                    self.default_target,
                    errno_text(&err)
                );
                false
            }
        }
    }

    /// Sleep in rest-interval steps so a stop request is seen promptly
    fn pause(&self, total: Duration) {
        let started = Instant::now();
        let step = self.context.timings.rest_interval.max(Duration::from_millis(1));
        while self.shared.is_active() {
            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }
            thread::sleep(step.min(total - elapsed));
        }
    }

    fn teardown(&mut self) {
        self.disconnect();
        self.context.sockets.unregister(&self.shared);
        self.shared.set_state(SocketState::Idle);
        self.shared.set_connection_count(0);
        info!(
            "Socket {} task finished after {} loops",
            self.name(),
            self.shared.loop_count()
        );
    }
}
