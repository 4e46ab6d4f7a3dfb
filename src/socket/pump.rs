//! Per-connection receive and transmit steps, run once per loop iteration.

use std::io;
use std::net::SocketAddrV4;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};

use super::connection::ConnState;
use super::descriptor::Behavior;
use super::hooks::SocketHooks;
use super::identify::{self, MAC_REQUEST};
use super::link::Link;
use crate::config::{Limits, Timings};
use crate::error::errno_text;
use crate::stream::StreamBuffer;
use crate::types::{FirmwareVersion, MacAddress, SocketKind};

/// Whether a connection survives the step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

/// Collapse `CR LF` and `LF CR` pairs into their first byte, in place
///
/// Pairs do not overlap: `CR LF CR LF` becomes `CR CR`. Returns the new
/// length.
pub fn normalize_line_endings(data: &mut [u8]) -> usize {
    let mut read = 0;
    let mut write = 0;
    while read < data.len() {
        let byte = data[read];
        data[write] = byte;
        write += 1;
        let paired = matches!(
            (byte, data.get(read + 1)),
            (b'\r', Some(b'\n')) | (b'\n', Some(b'\r'))
        );
        read += if paired { 2 } else { 1 };
    }
    write
}

fn alloc(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

/// Everything one connection step needs to know about its socket
pub(crate) struct Pump<'a> {
    pub name: &'a str,
    pub kind: SocketKind,
    pub behavior: &'a Behavior,
    pub timings: &'a Timings,
    pub limits: &'a Limits,
    /// Datagram mode with a broadcast-like target
    pub broadcast: bool,
    pub mac: MacAddress,
    pub version: FirmwareVersion,
    pub default_target: Option<SocketAddrV4>,
    pub identify_mac: &'a Mutex<Option<MacAddress>>,
}

impl Pump<'_> {
    /// Peek, read, intercept, normalize and push one chunk
    pub fn receive(
        &self,
        index: usize,
        link: &mut dyn Link,
        state: &mut ConnState,
        stream: &StreamBuffer,
        hooks: &mut dyn SocketHooks,
    ) -> Verdict {
        let handle = link.os_handle();
        let mut cap = self.limits.recv_chunk;

        if self.behavior.prevent_recv_overflow {
            if let Some(free) = stream.free_space() {
                let queued = stream.size();
                if queued > 0 && free < cap {
                    warn!(
                        "Limit read from socket {}[{}] {}: receive buffer free {}/{} bytes",
                        self.name, index, handle, free, cap
                    );
                }
                cap = cap.min(free);
            }
        }
        if cap == 0 {
            error!(
                "Skip read from socket {}[{}] {}: receive buffer full ({} bytes)",
                self.name,
                index,
                handle,
                stream.size()
            );
            return Verdict::Keep;
        }

        let Some(mut buf) = alloc(cap) else {
            error!(
                "Cannot allocate {} bytes for read peek from socket {}[{}] {}",
                cap, self.name, index, handle
            );
            return Verdict::Keep;
        };

        let peeked = if self.broadcast {
            link.peek_from(&mut buf).map(|(count, _)| count)
        } else {
            link.peek(&mut buf)
        };
        let peeked = match peeked {
            Ok(0) if self.kind == SocketKind::Stream => {
                info!(
                    "Socket {}[{}] {} closed by peer",
                    self.name, index, handle
                );
                return Verdict::Drop;
            }
            Ok(count) => count,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Verdict::Keep;
            }
            Err(err) => {
                error!(
                    "Error during read peek from socket {}[{}] {}: {}",
                    self.name,
                    index,
                    handle,
                    errno_text(&err)
                );
                return Verdict::Drop;
            }
        };

        let read = if self.broadcast {
            link.recv_from(&mut buf[..peeked]).map(|(count, source)| {
                debug!(
                    "Recv socket {}[{}] {} from {}",
                    self.name, index, handle, source
                );
                hooks.on_receive_from(source);
                count
            })
        } else {
            link.recv(&mut buf[..peeked])
        };
        let len = match read {
            Ok(count) if count == peeked => count,
            Ok(count) => {
                error!(
                    "Error during read from socket {}[{}] {}: peek/recv {}/{} bytes",
                    self.name, index, handle, peeked, count
                );
                return Verdict::Drop;
            }
            Err(err) => {
                error!(
                    "Error during read data from socket {}[{}] {}: {}",
                    self.name,
                    index,
                    handle,
                    errno_text(&err)
                );
                return Verdict::Drop;
            }
        };
        if len == 0 {
            return Verdict::Keep;
        }
        let data = &mut buf[..len];

        if self.behavior.identify_forced && data.starts_with(MAC_REQUEST) {
            *self
                .identify_mac
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(self.mac);
            info!("Last MAC on identification request {:X}", self.mac);
        }

        if state.identify_pending {
            if let Some(request) = identify::parse_request(data) {
                if self.send_identification(index, link) == Verdict::Drop {
                    return Verdict::Drop;
                }
                if request.completes() {
                    state.identify_pending = false;
                    state.send_enabled = true;
                }
                return Verdict::Keep;
            }
        }

        let mut len = data.len();
        if self.behavior.crlf_to_cr {
            len = normalize_line_endings(data);
        }

        let kept = hooks.on_receive(index, &mut data[..len]).min(len);
        if kept != len {
            info!(
                "OnReceive socket {}[{}] {}: returns {}/{} bytes",
                self.name, index, handle, kept, len
            );
        }
        if kept == 0 {
            return Verdict::Keep;
        }

        let pushed = stream.push(&data[..kept]);
        if pushed != kept {
            error!(
                "Error during read from socket {}[{}] {}: push |{}/{}->{}| bytes",
                self.name,
                index,
                handle,
                pushed,
                kept,
                stream.size()
            );
            return Verdict::Drop;
        }
        debug!(
            "Socket {}[{}] {}: push |{}/{}->{}| bytes",
            self.name,
            index,
            handle,
            pushed,
            kept,
            stream.size()
        );
        Verdict::Keep
    }

    /// Run the identification gate, or pull and send one chunk
    pub fn transmit(
        &self,
        index: usize,
        link: &mut dyn Link,
        state: &mut ConnState,
        stream: &StreamBuffer,
        hooks: &mut dyn SocketHooks,
    ) -> Verdict {
        let handle = link.os_handle();

        if !state.send_enabled {
            if state.identify_pending {
                state.identify_elapsed += self.timings.rest_interval;
                if state.identify_elapsed >= self.timings.identify_timeout {
                    error!(
                        "Send enable and identify disable on timeout socket {}[{}] {}",
                        self.name, index, handle
                    );
                    if self.behavior.identify_forced
                        && self.send_identification(index, link) == Verdict::Drop
                    {
                        return Verdict::Drop;
                    }
                    state.send_enabled = true;
                    state.identify_pending = false;
                }
            } else {
                state.send_enabled = true;
            }
            return Verdict::Keep;
        }

        let Some(mut buf) = alloc(self.limits.send_chunk) else {
            error!(
                "Cannot allocate {} bytes for send from socket {}[{}] {}",
                self.limits.send_chunk, self.name, index, handle
            );
            return Verdict::Keep;
        };
        let pulled = stream.pull(&mut buf);
        buf.truncate(pulled);

        if self.behavior.ping {
            if buf.is_empty() {
                state.ping_idle += self.timings.rest_interval;
                if state.ping_idle > self.timings.ping_interval {
                    state.ping_idle = Duration::ZERO;
                    state.ping_count += 1;
                    buf = format!("ping_count {} \r\n", state.ping_count).into_bytes();
                }
            } else {
                state.ping_idle = Duration::ZERO;
            }
        }

        if buf.is_empty() {
            return Verdict::Keep;
        }

        let sent = if self.broadcast {
            let target = hooks
                .on_send_to()
                .filter(|target| target.port() != 0)
                .or(self.default_target);
            match target {
                Some(target) => link.send_to(&buf, target),
                None => Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no datagram target",
                )),
            }
        } else {
            link.send(&buf)
        };

        match sent {
            Ok(count) if count == buf.len() => {
                hooks.on_send(index, &buf);
                state.ping_idle = Duration::ZERO;
                Verdict::Keep
            }
            Ok(count) => {
                error!(
                    "Error during send to socket {}[{}] {}: send {}/{} bytes",
                    self.name,
                    index,
                    handle,
                    count,
                    buf.len()
                );
                Verdict::Drop
            }
            Err(err) => {
                error!(
                    "Error during send to socket {}[{}] {}: {}",
                    self.name,
                    index,
                    handle,
                    errno_text(&err)
                );
                Verdict::Drop
            }
        }
    }

    fn send_identification(&self, index: usize, link: &mut dyn Link) -> Verdict {
        let handle = link.os_handle();
        let answer = identify::answer(self.mac, self.version);
        let sent = match (self.broadcast, self.default_target) {
            (true, Some(target)) => link.send_to(answer.as_bytes(), target),
            _ => link.send(answer.as_bytes()),
        };
        match sent {
            Ok(count) if count == answer.len() => {
                info!(
                    "Success send id to socket {}[{}] {}: sent {} bytes",
                    self.name, index, handle, count
                );
                Verdict::Keep
            }
            Ok(count) => {
                error!(
                    "Error during send id to socket {}[{}] {}: send {}/{} bytes",
                    self.name,
                    index,
                    handle,
                    count,
                    answer.len()
                );
                Verdict::Drop
            }
            Err(err) => {
                error!(
                    "Error during send id to socket {}[{}] {}: {}",
                    self.name,
                    index,
                    handle,
                    errno_text(&err)
                );
                Verdict::Drop
            }
        }
    }
}
