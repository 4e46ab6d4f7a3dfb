use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{info, warn};

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

use crate::registry::{Named, Registry};
use crate::stream::StreamBuffer;
use crate::types::{InterfaceId, MacAddress, SocketKind, SocketState};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between a socket's loop thread and its owners
///
/// Owners only flip flags here; all OS socket calls happen on the loop
/// thread.
pub struct SocketShared {
    name: String,
    port: u16,
    kind: SocketKind,
    active: AtomicBool,
    disconnect_request: AtomicBool,
    state: AtomicU8,
    connections: AtomicUsize,
    rejected: AtomicUsize,
    loop_count: AtomicU64,
    interface: Mutex<Option<InterfaceId>>,
    denied: Mutex<BTreeSet<InterfaceId>>,
    identify_mac: Mutex<Option<MacAddress>>,
    recv_streams: Vec<Arc<StreamBuffer>>,
    send_streams: Vec<Arc<StreamBuffer>>,
}

impl fmt::Debug for SocketShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketShared")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("state", &self.state())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl SocketShared {
    pub(crate) fn new(
        name: &str,
        port: u16,
        kind: SocketKind,
        slots: usize,
        slack: usize,
    ) -> Self {
        let make = |direction: &str, slot: usize| {
            Arc::new(StreamBuffer::new(format!("{name}.{direction}{slot}")).with_slack(slack))
        };
        Self {
            name: name.to_string(),
            port,
            kind,
            active: AtomicBool::new(true),
            disconnect_request: AtomicBool::new(false),
            state: AtomicU8::new(SocketState::Idle.as_u8()),
            connections: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            loop_count: AtomicU64::new(0),
            interface: Mutex::new(None),
            denied: Mutex::new(BTreeSet::new()),
            identify_mac: Mutex::new(None),
            recv_streams: (0..slots).map(|slot| make("rx", slot)).collect(),
            send_streams: (0..slots).map(|slot| make("tx", slot)).collect(),
        }
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

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn request_disconnect(&self) {
        self.disconnect_request.store(true, Ordering::SeqCst);
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_request.load(Ordering::SeqCst)
    }

    pub(crate) fn take_disconnect_request(&self) -> bool {
        self.disconnect_request.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn clear_disconnect_request(&self) {
        self.disconnect_request.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: SocketState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connection_count(&self, count: usize) {
        self.connections.store(count, Ordering::SeqCst);
    }

    /// Connections refused because the set was full
    pub fn rejected_count(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub(crate) fn count_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count.load(Ordering::SeqCst)
    }

    pub(crate) fn tick(&self) {
        self.loop_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Interface the socket is currently bound to
    pub fn interface(&self) -> Option<InterfaceId> {
        *lock(&self.interface)
    }

    pub(crate) fn set_interface(&self, interface: Option<InterfaceId>) {
        *lock(&self.interface) = interface;
    }

    pub fn set_connect_deny(&self, interface: InterfaceId, deny: bool) {
        let mut denied = lock(&self.denied);
        if deny {
            denied.insert(interface);
        } else {
            denied.remove(&interface);
        }
    }

    pub fn is_denied(&self, interface: InterfaceId) -> bool {
        lock(&self.denied).contains(&interface)
    }

    /// MAC of the interface in use when the last `man mac` query arrived
    pub fn last_identify_mac(&self) -> Option<MacAddress> {
        *lock(&self.identify_mac)
    }

    pub(crate) const fn identify_mac_slot(&self) -> &Mutex<Option<MacAddress>> {
        &self.identify_mac
    }

    pub fn recv_stream(&self, slot: usize) -> Option<&Arc<StreamBuffer>> {
        self.recv_streams.get(slot)
    }

    pub fn send_stream(&self, slot: usize) -> Option<&Arc<StreamBuffer>> {
        self.send_streams.get(slot)
    }

    pub fn slots(&self) -> usize {
        self.recv_streams.len()
    }
}

impl Named for SocketShared {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Owner's handle to a running socket
///
/// Dropping the handle stops the loop and waits for it to tear down.
pub struct SocketHandle {
    shared: Arc<SocketShared>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("shared", &self.shared)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl SocketHandle {
    pub(crate) const fn new(shared: Arc<SocketShared>, thread: JoinHandle<()>) -> Self {
        Self {
            shared,
            thread: Some(thread),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn shared(&self) -> &Arc<SocketShared> {
        &self.shared
    }

    /// Ask the loop to drop every connection; it reconnects afterwards
    pub fn request_disconnect(&self) {
        self.shared.request_disconnect();
    }

    /// Deny (or allow again) connecting through `interface`
    pub fn set_connect_deny(&self, interface: InterfaceId, deny: bool) {
        self.shared.set_connect_deny(interface, deny);
    }

    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connection_count()
    }

    pub fn rejected_count(&self) -> usize {
        self.shared.rejected_count()
    }

    pub fn loop_count(&self) -> u64 {
        self.shared.loop_count()
    }

    pub fn interface(&self) -> Option<InterfaceId> {
        self.shared.interface()
    }

    pub fn last_identify_mac(&self) -> Option<MacAddress> {
        self.shared.last_identify_mac()
    }

    /// Receive buffer of connection slot `slot`
    pub fn recv_stream(&self, slot: usize) -> Option<&Arc<StreamBuffer>> {
        self.shared.recv_stream(slot)
    }

    /// Transmit buffer of connection slot `slot`
    pub fn send_stream(&self, slot: usize) -> Option<&Arc<StreamBuffer>> {
        self.shared.send_stream(slot)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the loop and wait for its teardown
    pub fn stop(&mut self) {
        self.shared.deactivate();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Socket {} task panicked", self.shared.name());
            } else {
                info!("Socket {} task stopped", self.shared.name());
            }
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Registry of running sockets
pub type SocketRegistry = Registry<SocketShared>;

impl Registry<SocketShared> {
    /// Snapshot of every listed socket
    pub fn report(&self) -> SocketReport {
        let sockets = self
            .entries()
            .iter()
            .map(|socket| SocketInfo {
                name: socket.name().to_string(),
                port: socket.port(),
                kind: socket.kind(),
                loop_count: socket.loop_count(),
                state: socket.state(),
                connections: socket.connection_count(),
            })
            .collect::<Vec<_>>();
        SocketReport {
            listed: sockets.len(),
            total: self.total(),
            sockets,
        }
    }

    /// Write the report to the log, one line per socket
    pub fn log_list(&self) {
        for line in self.report().to_string().lines() {
            info!("{line}");
        }
    }
}

/// One line of the socket listing
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct SocketInfo {
    pub name: String,
    pub port: u16,
    pub kind: SocketKind,
    pub loop_count: u64,
    pub state: SocketState,
    pub connections: usize,
}

/// Socket listing with registry counters
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct SocketReport {
    pub listed: usize,
    pub total: usize,
    pub sockets: Vec<SocketInfo>,
}

impl fmt::Display for SocketReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sockets in list {}. Sockets Total {}.",
            self.listed, self.total
        )?;
        for (index, socket) in self.sockets.iter().enumerate() {
            writeln!(
                f,
                "Socket[{:2}] Name:{:>16}|Port:{:>5}|{}|Loop:{:>10}|{}|Conn:{}",
                index,
                socket.name,
                socket.port,
                socket.kind,
                socket.loop_count,
                socket.state,
                socket.connections
            )?;
        }
        Ok(())
    }
}
