//! OS socket plumbing: creation, binding and the per-connection byte link.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, TcpKeepalive, Type};

use crate::config::Timings;
use crate::types::SocketKind;

/// Byte transport of one live connection
///
/// All reads are non-blocking: an empty socket reports `WouldBlock`.
pub trait Link: Send {
    /// Copy pending bytes without consuming them
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Like [`Link::peek`], also reporting the sender
    fn peek_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddrV4)>;

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddrV4)>;

    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> io::Result<usize>;

    /// OS handle number, for log lines
    fn os_handle(&self) -> i64;

    /// Shut both directions down; the handle closes when dropped
    fn shutdown(&mut self) -> io::Result<()>;
}

/// A connected TCP stream or a bound UDP socket
#[derive(Debug)]
pub enum OsLink {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

fn only_v4(addr: SocketAddr) -> io::Result<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(v6) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("IPv6 peer {v6} on an IPv4 socket"),
        )),
    }
}

fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{operation} is not supported on a stream connection"),
    )
}

impl OsLink {
    fn sock_ref(&self) -> SockRef<'_> {
        match self {
            Self::Tcp(stream) => SockRef::from(stream),
            Self::Udp(socket) => SockRef::from(socket),
        }
    }

    /// Switch to non-blocking mode and apply per-connection options
    ///
    /// Option failures are logged by the caller; only the mode switch is
    /// fatal to the connection.
    pub(crate) fn prepare(
        &self,
        permit_broadcast: bool,
        timings: &Timings,
    ) -> io::Result<Vec<(&'static str, io::Error)>> {
        let mut failures = Vec::new();
        match self {
            Self::Tcp(stream) => stream.set_nonblocking(true)?,
            Self::Udp(socket) => socket.set_nonblocking(true)?,
        }

        let sock = self.sock_ref();
        if permit_broadcast {
            if let Err(err) = sock.set_broadcast(true) {
                failures.push(("permit broadcast", err));
            }
        }
        if matches!(self, Self::Tcp(_)) {
            if let Err(err) = sock.set_keepalive(true) {
                failures.push(("keep alive", err));
            }
            if let Err(err) = sock.set_tcp_keepalive(&keepalive(timings)) {
                failures.push(("keep idle/intvl/cnt", err));
            }
        }
        Ok(failures)
    }
}

fn keepalive(timings: &Timings) -> TcpKeepalive {
    let params = TcpKeepalive::new().with_time(timings.keepalive_idle);
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    let params = params
        .with_interval(timings.keepalive_interval)
        .with_retries(timings.keepalive_count);
    params
}

impl Link for OsLink {
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.peek(buf),
            Self::Udp(socket) => socket.peek(buf),
        }
    }

    fn peek_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddrV4)> {
        match self {
            Self::Tcp(_) => Err(unsupported("peek_from")),
            Self::Udp(socket) => {
                let (count, addr) = socket.peek_from(buf)?;
                Ok((count, only_v4(addr)?))
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Udp(socket) => socket.recv(buf),
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddrV4)> {
        match self {
            Self::Tcp(_) => Err(unsupported("recv_from")),
            Self::Udp(socket) => {
                let (count, addr) = socket.recv_from(buf)?;
                Ok((count, only_v4(addr)?))
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(data),
            Self::Udp(socket) => socket.send(data),
        }
    }

    fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> io::Result<usize> {
        match self {
            Self::Tcp(_) => Err(unsupported("send_to")),
            Self::Udp(socket) => socket.send_to(data, target),
        }
    }

    #[cfg(unix)]
    fn os_handle(&self) -> i64 {
        use std::os::fd::AsRawFd;
        match self {
            Self::Tcp(stream) => i64::from(stream.as_raw_fd()),
            Self::Udp(socket) => i64::from(socket.as_raw_fd()),
        }
    }

    #[cfg(not(unix))]
    fn os_handle(&self) -> i64 {
        -1
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Self::Udp(_) => Ok(()),
        }
    }
}

/// Create an unbound IPv4 socket of the given kind
pub(crate) fn create(kind: SocketKind) -> io::Result<Socket> {
    match kind {
        SocketKind::Stream => Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)),
        SocketKind::Datagram => Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)),
    }
}

/// OS handle number of an unconnected socket, for log lines
#[cfg(unix)]
pub(crate) fn raw_handle(socket: &Socket) -> i64 {
    use std::os::fd::AsRawFd;
    i64::from(socket.as_raw_fd())
}

#[cfg(not(unix))]
pub(crate) fn raw_handle(_socket: &Socket) -> i64 {
    -1
}

/// Bind and listen; the listener is left non-blocking
pub(crate) fn listen(socket: Socket, local: SocketAddrV4, backlog: i32) -> io::Result<TcpListener> {
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(local))?;
    socket.listen(backlog)?;
    let listener = TcpListener::from(socket);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Bind to the interface address and connect to `target`
pub(crate) fn connect_stream(
    socket: Socket,
    local: SocketAddrV4,
    target: SocketAddrV4,
    timeout: Duration,
) -> io::Result<OsLink> {
    socket.bind(&SockAddr::from(local))?;
    socket.connect_timeout(&SockAddr::from(target), timeout)?;
    Ok(OsLink::Tcp(TcpStream::from(socket)))
}

/// Bind a datagram socket; connect it unless it talks to a broadcast target
pub(crate) fn bind_datagram(
    socket: Socket,
    local: SocketAddrV4,
    target: Option<SocketAddrV4>,
    permit_broadcast: bool,
) -> io::Result<OsLink> {
    socket.set_reuse_address(true)?;
    if permit_broadcast {
        socket.set_broadcast(true)?;
    }
    socket.bind(&SockAddr::from(local))?;
    if let Some(target) = target {
        socket.connect(&SockAddr::from(target))?;
    }
    Ok(OsLink::Udp(UdpSocket::from(socket)))
}
