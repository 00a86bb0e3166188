//! Reactor integration layer.
//!
//! Wraps a `mio` poll instance with the two kinds of watches the engine uses:
//!
//! - I/O watches: read and write readiness per socket, tracked in an
//!   [`IoWatch`] so that registering, re-registering and deregistering with
//!   the OS always matches what the connection actually wants
//! - idle timers: one restartable deadline per pool slot
//!
//! `mio` is edge-triggered. Handlers driven by this reactor keep performing an
//! operation until it would block; a readiness event is not repeated for bytes
//! that were already signalled.

mod idle_timers;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use tracing::trace;

use idle_timers::IdleTimers;

/// Token of the listening socket
pub(crate) const LISTENER: Token = Token(usize::MAX - 1);

/// Token of the cross-thread waker
pub(crate) const WAKER: Token = Token(usize::MAX - 2);

/// Which readiness kinds a socket is currently registered for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IoWatch {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl IoWatch {
    pub(crate) const NONE: IoWatch = IoWatch { readable: false, writable: false };

    pub(crate) fn with_readable(self, readable: bool) -> Self {
        Self { readable, ..self }
    }

    pub(crate) fn with_writable(self, writable: bool) -> Self {
        Self { writable, ..self }
    }

    fn interest(self) -> Option<Interest> {
        match (self.readable, self.writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// One delivered readiness event, detached from the `mio` event buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Readiness {
    pub(crate) token: Token,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
}

#[derive(Debug)]
pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    timers: IdleTimers,
    idle_timeout: Duration,
    waker: Arc<Waker>,
}

impl Reactor {
    pub(crate) fn new(slots: usize, event_capacity: usize, idle_timeout: Duration) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(Self { poll, events: Events::with_capacity(event_capacity), timers: IdleTimers::new(slots), idle_timeout, waker })
    }

    pub(crate) fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    /// Moves the registration of `source` from `current` to `next`.
    pub(crate) fn update_io<S>(&self, source: &mut S, token: Token, current: &mut IoWatch, next: IoWatch) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if *current == next {
            return Ok(());
        }

        match (current.interest(), next.interest()) {
            (None, Some(interest)) => self.registry().register(source, token, interest)?,
            (Some(_), Some(interest)) => self.registry().reregister(source, token, interest)?,
            (Some(_), None) => self.registry().deregister(source)?,
            (None, None) => {}
        }
        *current = next;
        Ok(())
    }

    /// Starts or restarts the idle timer of `slot`.
    pub(crate) fn restart_idle(&mut self, slot: usize) {
        self.timers.arm(slot, Instant::now() + self.idle_timeout);
    }

    pub(crate) fn stop_idle(&mut self, slot: usize) {
        self.timers.disarm(slot);
    }

    #[cfg(test)]
    pub(crate) fn is_idle_armed(&self, slot: usize) -> bool {
        self.timers.is_armed(slot)
    }

    /// Waits for readiness events or the next idle deadline, whichever comes
    /// first, and appends what was delivered to `ready`.
    pub(crate) fn poll(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = match (timeout, self.timers.next_deadline()) {
            (timeout, None) => timeout,
            (None, Some(deadline)) => Some(deadline.saturating_duration_since(Instant::now())),
            (Some(timeout), Some(deadline)) => Some(timeout.min(deadline.saturating_duration_since(Instant::now()))),
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        ready.extend(self.events.iter().map(|event| Readiness {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
            error: event.is_error(),
        }));
        trace!(events = ready.len(), "reactor poll returned");
        Ok(())
    }

    /// Collects the slots whose idle timer ran out.
    pub(crate) fn expire_idle(&mut self, expired: &mut Vec<usize>) {
        self.timers.expire(Instant::now(), expired);
    }
}
