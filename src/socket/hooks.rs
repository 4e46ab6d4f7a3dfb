use std::net::SocketAddrV4;

/// Application callbacks of one socket
///
/// Every method has a no-op default, so an implementation only overrides
/// what it needs. Callbacks run on the socket's own thread.
pub trait SocketHooks: Send {
    /// Connection `index` came up
    fn on_connect(&mut self, _index: usize) {}

    /// Connection `index` went away
    fn on_disconnect(&mut self, _index: usize) {}

    /// Bytes read from connection `index`, before they reach the receive
    /// buffer
    ///
    /// Returns how many leading bytes of `data` to push downstream; the
    /// hook may rewrite them in place.
    fn on_receive(&mut self, _index: usize, data: &mut [u8]) -> usize {
        data.len()
    }

    /// Bytes fully sent on connection `index`
    fn on_send(&mut self, _index: usize, _data: &[u8]) {}

    /// Source of the last datagram read in broadcast mode
    fn on_receive_from(&mut self, _source: SocketAddrV4) {}

    /// Destination for the next datagram in broadcast mode
    ///
    /// `None`, or an address with port 0, keeps the default target.
    fn on_send_to(&mut self) -> Option<SocketAddrV4> {
        None
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SocketHooks for NoHooks {}
