//! End-to-end scenarios over the loopback interface.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sockvisor::socket::identification_answer;
use sockvisor::{
    AdapterSet, FirmwareVersion, InterfaceId, MacAddress, SocketConfig, SocketHandle,
    SocketHooks, SocketManager, SocketState, StaticAdapter, Timings,
};

const MAC: MacAddress = MacAddress::new([0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56]);
const VERSION: FirmwareVersion = FirmwareVersion::new(1, 2, 3);

fn manager() -> SocketManager {
    let _ = env_logger::builder().is_test(true).try_init();
    let adapters = AdapterSet::new().with(
        InterfaceId::WifiStation,
        Arc::new(StaticAdapter::new(MAC, Some(Ipv4Addr::LOCALHOST))),
    );
    let timings = Timings::default()
        .rest_interval(Duration::from_millis(5))
        .reconnect_delay(Duration::from_millis(50))
        .listen_accept_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_secs(1));
    SocketManager::builder()
        .adapters(adapters)
        .timings(timings)
        .firmware_version(VERSION)
        .build()
}

fn free_tcp_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn connect(port: u16) -> TcpStream {
    let mut stream = None;
    wait_until("server to listen", || {
        stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).ok();
        stream.is_some()
    });
    let stream = stream.unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    stream
}

fn accept(listener: &TcpListener) -> TcpStream {
    listener.set_nonblocking(true).unwrap();
    let mut stream = None;
    wait_until("client to connect", || {
        stream = listener.accept().ok().map(|(stream, _)| stream);
        stream.is_some()
    });
    let stream = stream.unwrap();
    stream.set_nonblocking(false).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    stream
}

fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

fn pull_when_ready(handle: &SocketHandle, slot: usize, len: usize) -> Vec<u8> {
    let rx = handle.recv_stream(slot).unwrap();
    wait_until("received bytes", || rx.size() >= len);
    rx.pull_vec(len)
}

/// Records callbacks as text lines
#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl SocketHooks for Events {
    fn on_connect(&mut self, index: usize) {
        self.0.lock().unwrap().push(format!("connect {index}"));
    }

    fn on_disconnect(&mut self, index: usize) {
        self.0.lock().unwrap().push(format!("disconnect {index}"));
    }
}

#[test]
fn server_caps_connections_and_echoes() {
    let manager = manager();
    let port = free_tcp_port();
    let events = Events::default();
    let config = SocketConfig::server("srv", port)
        .max_connections(2)
        .build()
        .unwrap();
    let handle = manager.start(config, events.clone()).unwrap();

    let mut first = connect(port);
    wait_until("first connection", || handle.connection_count() == 1);
    let _second = connect(port);
    let mut third = connect(port);

    wait_until("second connection", || handle.connection_count() == 2);
    wait_until("rejection", || handle.rejected_count() == 1);
    assert_eq!(handle.state(), SocketState::Connected);
    assert_eq!(handle.interface(), Some(InterfaceId::WifiStation));

    // The refused client sees an orderly close.
    let mut buf = [0u8; 8];
    assert_eq!(third.read(&mut buf).unwrap(), 0);

    first.write_all(b"hello").unwrap();
    assert_eq!(pull_when_ready(&handle, 0, 5), b"hello");
    handle.send_stream(0).unwrap().push(b"olleh");
    assert_eq!(read_exactly(&mut first, 5), b"olleh");

    drop(first);
    wait_until("peer close noticed", || handle.connection_count() == 1);
    wait_until("disconnect callback", || {
        events.lines().contains(&"disconnect 0".to_string())
    });
    let lines = events.lines();
    assert_eq!(&lines[..2], ["connect 0", "connect 1"]);

    let report = manager.sockets().report();
    assert_eq!(report.listed, 1);
    assert_eq!(report.sockets[0].name, "srv");
    assert_eq!(report.sockets[0].port, port);
    assert!(report.sockets[0].loop_count > 0);
}

#[test]
fn client_echoes_and_reconnects_on_request() {
    let manager = manager();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SocketConfig::client("cli", port)
        .host(Ipv4Addr::LOCALHOST)
        .build()
        .unwrap();
    let handle = manager.start(config, Events::default()).unwrap();

    let mut peer = accept(&listener);
    wait_until("client connected", || handle.state() == SocketState::Connected);

    peer.write_all(b"hello").unwrap();
    assert_eq!(pull_when_ready(&handle, 0, 5), b"hello");
    handle.send_stream(0).unwrap().push(b"world");
    assert_eq!(read_exactly(&mut peer, 5), b"world");

    handle.request_disconnect();
    let mut buf = [0u8; 8];
    assert_eq!(peer.read(&mut buf).unwrap(), 0);

    let mut again = accept(&listener);
    wait_until("client reconnected", || handle.state() == SocketState::Connected);
    handle.send_stream(0).unwrap().push(b"back");
    assert_eq!(read_exactly(&mut again, 4), b"back");
}

#[test]
fn forced_identification_holds_traffic() {
    let manager = manager();
    let port = free_tcp_port();
    let config = SocketConfig::server("ident", port)
        .identify_forced(true)
        .build()
        .unwrap();
    let handle = manager.start(config, Events::default()).unwrap();

    let mut peer = connect(port);
    wait_until("connection", || handle.connection_count() == 1);
    handle.send_stream(0).unwrap().push(b"queued");

    let expected = identification_answer(MAC, VERSION);
    peer.write_all(b"man mac\r\n").unwrap();
    assert_eq!(read_exactly(&mut peer, expected.len()), expected.as_bytes());
    assert_eq!(handle.last_identify_mac(), Some(MAC));

    peer.write_all(b"man ver\r\n").unwrap();
    assert_eq!(read_exactly(&mut peer, expected.len()), expected.as_bytes());

    // Identification requests never reach the receive buffer.
    assert_eq!(handle.recv_stream(0).unwrap().size(), 0);
    assert_eq!(read_exactly(&mut peer, 6), b"queued");
}

#[derive(Clone, Default)]
struct ReplyToSender(Arc<Mutex<Option<SocketAddrV4>>>);

impl SocketHooks for ReplyToSender {
    fn on_receive_from(&mut self, source: SocketAddrV4) {
        *self.0.lock().unwrap() = Some(source);
    }

    fn on_send_to(&mut self) -> Option<SocketAddrV4> {
        *self.0.lock().unwrap()
    }
}

#[test]
fn broadcast_datagram_replies_to_sender() {
    let manager = manager();
    let port = free_udp_port();
    let hooks = ReplyToSender::default();
    let config = SocketConfig::client("beacon", port)
        .datagram()
        .host(Ipv4Addr::BROADCAST)
        .permit_broadcast(true)
        .build()
        .unwrap();
    let handle = manager.start(config, hooks.clone()).unwrap();
    wait_until("datagram socket bound", || {
        handle.state() == SocketState::Connected
    });

    let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    peer.send_to(b"hello", (Ipv4Addr::LOCALHOST, port)).unwrap();

    assert_eq!(pull_when_ready(&handle, 0, 5), b"hello");
    let recorded = *hooks.0.lock().unwrap();
    let source = recorded.expect("sender recorded");
    assert_eq!(
        std::net::SocketAddr::V4(source),
        peer.local_addr().unwrap()
    );

    handle.send_stream(0).unwrap().push(b"reply");
    let mut buf = [0u8; 16];
    let (count, from) = peer.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..count], b"reply");
    assert_eq!(from.port(), port);
}

#[test]
fn denied_interface_blocks_connecting() {
    let manager = manager();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = SocketConfig::client("denied", port)
        .host(Ipv4Addr::LOCALHOST)
        .build()
        .unwrap();
    let handle = manager.start(config, Events::default()).unwrap();
    handle.set_connect_deny(InterfaceId::WifiStation, true);

    wait_until("denied state", || handle.state() == SocketState::Denied);
    let _ = accept_within(&listener, Duration::from_millis(200));
    wait_until("connections dropped", || handle.connection_count() == 0);
    assert_eq!(handle.state(), SocketState::Denied);

    handle.set_connect_deny(InterfaceId::WifiStation, false);
    let _peer = accept(&listener);
    wait_until("connected after allow", || {
        handle.state() == SocketState::Connected
    });
}

/// Drain a connection that may have raced the deny flag
fn accept_within(listener: &TcpListener, window: Duration) -> Option<TcpStream> {
    listener.set_nonblocking(true).unwrap();
    let deadline = Instant::now() + window;
    while Instant::now() < deadline {
        if let Ok((stream, _)) = listener.accept() {
            return Some(stream);
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn stopping_unregisters_socket() {
    let manager = manager();
    let port = free_tcp_port();
    let config = SocketConfig::server("short", port).build().unwrap();
    let mut handle = manager.start(config, Events::default()).unwrap();
    assert!(manager.find_socket("short").is_some());
    assert!(handle.is_running());

    handle.stop();
    assert!(!handle.is_running());
    assert_eq!(handle.state(), SocketState::Idle);
    assert!(manager.find_socket("short").is_none());
}
