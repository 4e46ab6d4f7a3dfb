use std::time::Duration;

/// Ordered, capped list of live connections
///
/// Removing an entry shifts the later ones down, so index 0 is always the
/// oldest surviving connection.
#[derive(Debug)]
pub struct ConnectionSet<C> {
    items: Vec<C>,
    max: usize,
}

impl<C> ConnectionSet<C> {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            items: Vec::with_capacity(max),
            max,
        }
    }

    /// Append a connection, returning its index
    ///
    /// # Errors
    /// Hands the connection back when the set is full.
    pub fn add(&mut self, item: C) -> Result<usize, C> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push(item);
        Ok(self.items.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Option<C> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut C> {
        self.items.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max
    }

    pub const fn max(&self) -> usize {
        self.max
    }
}

/// Gating and keepalive state of one connection
///
/// Identification and send-enable are independent of the socket lifecycle:
/// a connected socket may hold traffic back until its peer identified us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnState {
    pub identify_pending: bool,
    pub send_enabled: bool,
    pub identify_elapsed: Duration,
    pub ping_idle: Duration,
    pub ping_count: u32,
}

impl ConnState {
    /// Fresh state for a connection that just came up
    #[must_use]
    pub fn on_connect(identify_forced: bool, auto_send_enable: bool) -> Self {
        Self {
            identify_pending: identify_forced,
            send_enabled: !identify_forced && auto_send_enable,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_up_to_max_then_reject() {
        let mut set = ConnectionSet::new(2);
        assert_eq!(set.add("a"), Ok(0));
        assert_eq!(set.add("b"), Ok(1));
        assert_eq!(set.add("c"), Err("c"));
        assert_eq!(set.len(), 2);
        assert!(set.is_full());
    }

    #[test]
    fn remove_shifts_down() {
        let mut set = ConnectionSet::new(3);
        set.add(10).unwrap();
        set.add(20).unwrap();
        set.add(30).unwrap();
        assert_eq!(set.remove(0), Some(10));
        assert_eq!(set.get_mut(0).copied(), Some(20));
        assert_eq!(set.remove(5), None);
        assert_eq!(set.add(40), Ok(2));
    }

    #[test]
    fn connect_state_follows_flags() {
        let forced = ConnState::on_connect(true, true);
        assert!(forced.identify_pending);
        assert!(!forced.send_enabled);

        let open = ConnState::on_connect(false, true);
        assert!(!open.identify_pending);
        assert!(open.send_enabled);

        let manual = ConnState::on_connect(false, false);
        assert!(!manual.send_enabled);
        assert_eq!(manual.ping_count, 0);
    }
}
