//! Timing and sizing knobs shared by every supervised socket.

use std::time::Duration;

/// Timers driving the socket loop
///
/// The rest interval is the granularity of every other timer: idle and
/// identification timers advance by one rest interval per loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub rest_interval: Duration,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub identify_timeout: Duration,
    pub dns_poll_interval: Duration,
    pub dns_timeout: Duration,
    pub listen_accept_timeout: Duration,
    pub connect_timeout: Duration,
    pub keepalive_idle: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_count: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            rest_interval: Duration::from_millis(10),
            reconnect_delay: Duration::from_millis(5000),
            ping_interval: Duration::from_millis(10_000),
            identify_timeout: Duration::from_millis(10_000),
            dns_poll_interval: Duration::from_millis(100),
            dns_timeout: Duration::from_secs(60),
            listen_accept_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            keepalive_idle: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(5),
            keepalive_count: 3,
        }
    }
}

impl Timings {
    #[must_use]
    pub const fn rest_interval(mut self, interval: Duration) -> Self {
        self.rest_interval = interval;
        self
    }

    #[must_use]
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub const fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    #[must_use]
    pub const fn identify_timeout(mut self, timeout: Duration) -> Self {
        self.identify_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn dns(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.dns_poll_interval = poll_interval;
        self.dns_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn listen_accept_timeout(mut self, timeout: Duration) -> Self {
        self.listen_accept_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn keepalive(mut self, idle: Duration, interval: Duration, count: u32) -> Self {
        self.keepalive_idle = idle;
        self.keepalive_interval = interval;
        self.keepalive_count = count;
        self
    }
}

/// Capacities of the registries and per-call I/O caps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_sockets: usize,
    pub max_streams: usize,
    pub max_connections: usize,
    pub recv_chunk: usize,
    pub send_chunk: usize,
    pub stream_max_len: usize,
    pub stream_slack: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sockets: 10,
            max_streams: 20,
            max_connections: 4,
            recv_chunk: 2048,
            send_chunk: 1024,
            stream_max_len: crate::stream::DEFAULT_MAX_LEN,
            stream_slack: crate::stream::DEFAULT_SLACK,
        }
    }
}

impl Limits {
    #[must_use]
    pub const fn max_sockets(mut self, count: usize) -> Self {
        self.max_sockets = count;
        self
    }

    #[must_use]
    pub const fn max_streams(mut self, count: usize) -> Self {
        self.max_streams = count;
        self
    }

    /// Default connection cap for server sockets that do not set their own
    #[must_use]
    pub const fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = count;
        self
    }

    #[must_use]
    pub const fn io_chunks(mut self, recv: usize, send: usize) -> Self {
        self.recv_chunk = recv;
        self.send_chunk = send;
        self
    }

    #[must_use]
    pub const fn stream_sizing(mut self, max_len: usize, slack: usize) -> Self {
        self.stream_max_len = max_len;
        self.stream_slack = slack;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_sizing() {
        let timings = Timings::default();
        assert_eq!(timings.rest_interval, Duration::from_millis(10));
        assert_eq!(timings.ping_interval, Duration::from_secs(10));
        assert_eq!(timings.dns_timeout, Duration::from_secs(60));

        let limits = Limits::default();
        assert_eq!(limits.max_sockets, 10);
        assert_eq!(limits.max_streams, 20);
        assert_eq!(limits.recv_chunk, 2048);
        assert_eq!(limits.send_chunk, 1024);
        assert_eq!(limits.stream_max_len, 4096);
        assert_eq!(limits.stream_slack, 1024);
    }

    #[test]
    fn setters_chain() {
        let timings = Timings::default()
            .rest_interval(Duration::from_millis(1))
            .keepalive(Duration::from_secs(1), Duration::from_secs(2), 7);
        assert_eq!(timings.rest_interval, Duration::from_millis(1));
        assert_eq!(timings.keepalive_count, 7);

        let limits = Limits::default().max_sockets(3).stream_sizing(512, 128);
        assert_eq!(limits.max_sockets, 3);
        assert_eq!(limits.stream_max_len, 512);
        assert_eq!(limits.stream_slack, 128);
    }
}
