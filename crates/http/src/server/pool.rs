use std::io;

use tracing::debug;

use crate::connection::{ConnState, HttpConnection, Stream};
use crate::protocol::{ConnectionError, PeerAddr};
use crate::reactor::Reactor;

/// Fixed set of connection slots, allocated once.
///
/// Free slots are kept on a stack so claiming one is O(1); the lowest slots
/// are handed out first.
#[derive(Debug)]
pub(crate) struct Pool {
    slots: Vec<HttpConnection>,
    free: Vec<usize>,
}

impl Pool {
    pub(crate) fn new(capacity: usize, buffer_size: usize, max_entries: usize) -> Self {
        let slots = (0..capacity).map(|slot| HttpConnection::new(slot, buffer_size, max_entries)).collect();
        let free = (0..capacity).rev().collect();
        Self { slots, free }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Takes a free slot, `None` when every slot is in use.
    pub(crate) fn claim(&mut self) -> Option<usize> {
        self.free.pop()
    }

    /// Returns a claimed slot that never got a socket.
    pub(crate) fn unclaim(&mut self, slot: usize) {
        debug_assert!(self.slots[slot].is_free());
        self.free.push(slot);
    }

    /// Binds an accepted socket to a claimed slot. On failure the socket is
    /// dropped and the slot freed again.
    pub(crate) fn open(&mut self, slot: usize, reactor: &mut Reactor, stream: Stream, peer: PeerAddr) -> io::Result<()> {
        let connection = &mut self.slots[slot];
        if let Err(e) = connection.open(reactor, stream, peer) {
            debug!(slot, %peer, "failed to register connection, cause {}", e);
            connection.close(reactor);
            self.free.push(slot);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut HttpConnection {
        &mut self.slots[slot]
    }

    pub(crate) fn get(&self, slot: usize) -> Option<&HttpConnection> {
        self.slots.get(slot)
    }

    pub(crate) fn get_mut(&mut self, slot: usize) -> Option<&mut HttpConnection> {
        self.slots.get_mut(slot)
    }

    pub(crate) fn any_dispatched(&self) -> bool {
        self.slots.iter().any(|connection| connection.state() == ConnState::Dispatched)
    }

    /// Closes the connection in `slot` and frees the slot. A free slot is left
    /// alone.
    pub(crate) fn close(&mut self, slot: usize, reactor: &mut Reactor, cause: Option<&ConnectionError>) {
        let Some(connection) = self.slots.get_mut(slot) else {
            return;
        };
        if connection.is_free() {
            return;
        }

        match (cause, connection.peer_addr()) {
            (Some(cause), Some(peer)) => debug!(slot, %peer, "close connection, cause {}", cause),
            (Some(cause), None) => debug!(slot, "close connection, cause {}", cause),
            (None, _) => debug!(slot, "response complete, close connection"),
        }
        connection.close(reactor);
        self.free.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_lowest_slot_first() {
        let mut pool = Pool::new(3, 1024, 16);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.claim(), Some(0));
        assert_eq!(pool.claim(), Some(1));
        assert_eq!(pool.claim(), Some(2));
        assert_eq!(pool.claim(), None);
        assert!(!pool.has_free());
        assert_eq!(pool.in_use(), 3);

        pool.unclaim(1);
        assert_eq!(pool.claim(), Some(1));
    }

    #[test]
    fn closing_a_free_slot_keeps_the_free_list_intact() {
        let mut reactor = Reactor::new(2, 16, std::time::Duration::from_secs(1)).unwrap();
        let mut pool = Pool::new(2, 1024, 16);
        pool.close(0, &mut reactor, Some(&ConnectionError::IdleTimeout));
        pool.close(7, &mut reactor, None);

        assert_eq!(pool.in_use(), 0);
        assert!(!pool.any_dispatched());
    }
}
