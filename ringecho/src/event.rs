//! Readiness events of the session socket.
//!
//! The stack does not call back into the application. Instead, after every tick the [`Watcher`]
//! compares what the socket looks like now with the previous tick and derives the events which
//! occurred in between. All events of one tick form a [`Readiness`] set which is delivered in
//! the fixed order of the [`Event`] variants.
use core::fmt;

use smoltcp::socket::tcp::{self, State};

/// A readiness condition of the session socket.
///
/// The declaration order is the order of handling when several occur together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Event {
    /// A peer connected.
    Connected,
    /// Received data can be read.
    Readable,
    /// There is room to write.
    Writable,
    /// The peer closed its sending side.
    Closing,
    /// The connection shut down in an orderly manner.
    Closed,
    /// The connection was dropped without an orderly shutdown.
    Errored,
}

/// The set of events of one notification.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    bits: u8,
}

/// Iterator over the events of a [`Readiness`], in handling order.
pub struct Iter {
    remaining: Readiness,
}

/// What the socket looked like after a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    /// The TCP state.
    pub state: State,
    /// Received data is waiting.
    pub can_recv: bool,
    /// The transmit buffer has room.
    pub can_send: bool,
}

/// Derives events from successive observations of one socket.
#[derive(Debug)]
pub struct Watcher {
    last: State,
    connected: bool,
    peer_closed: bool,
    finished: bool,
}

impl Event {
    /// Every event, in handling order.
    pub const ALL: [Event; 6] = [
        Event::Connected,
        Event::Readable,
        Event::Writable,
        Event::Closing,
        Event::Closed,
        Event::Errored,
    ];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl Readiness {
    /// Whether no event occurred.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Whether `event` occurred.
    pub fn contains(&self, event: Event) -> bool {
        self.bits & event.bit() != 0
    }

    /// Add `event` to the set.
    pub fn insert(&mut self, event: Event) {
        self.bits |= event.bit();
    }

    /// The events, in handling order.
    pub fn iter(&self) -> Iter {
        Iter { remaining: *self }
    }
}

impl Iterator for Iter {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let event = Event::ALL
            .iter()
            .copied()
            .find(|&event| self.remaining.contains(event))?;
        self.remaining.bits &= !event.bit();
        Some(event)
    }
}

impl IntoIterator for Readiness {
    type Item = Event;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl FromIterator<Event> for Readiness {
    fn from_iter<I: IntoIterator<Item = Event>>(events: I) -> Self {
        let mut readiness = Readiness::default();
        events.into_iter().for_each(|event| readiness.insert(event));
        readiness
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Observation {
    /// Look at the socket as it is now.
    pub fn of(socket: &tcp::Socket) -> Self {
        Observation {
            state: socket.state(),
            can_recv: socket.can_recv(),
            can_send: socket.can_send(),
        }
    }
}

impl Watcher {
    /// Watch a socket that starts out listening.
    pub fn new() -> Self {
        Watcher {
            last: State::Listen,
            connected: false,
            peer_closed: false,
            finished: false,
        }
    }

    /// The events between the previous observation and this one.
    pub fn observe(&mut self, now: Observation) -> Readiness {
        let mut ready = Readiness::default();
        let last = core::mem::replace(&mut self.last, now.state);

        if self.finished {
            return ready;
        }

        if !self.connected {
            // The listener never closes itself. Reaching `Closed` means a connection was reset,
            // possibly before its handshake could be observed.
            if now.state == State::Closed {
                self.finished = true;
                ready.insert(Event::Errored);
                return ready;
            }

            if !is_synchronized(now.state) {
                return ready;
            }
            self.connected = true;
            ready.insert(Event::Connected);
        }

        if now.can_recv {
            ready.insert(Event::Readable);
        }

        if now.can_send {
            ready.insert(Event::Writable);
        }

        if !self.peer_closed && fin_received(now.state) {
            self.peer_closed = true;
            ready.insert(Event::Closing);
        }

        match now.state {
            State::TimeWait => {
                self.finished = true;
                ready.insert(Event::Closed);
            },
            State::Closed if last == State::LastAck => {
                self.finished = true;
                ready.insert(Event::Closed);
            },
            State::Closed | State::Listen => {
                self.finished = true;
                ready.insert(Event::Errored);
            },
            _ => (),
        }

        ready
    }
}

impl Default for Watcher {
    fn default() -> Self {
        Watcher::new()
    }
}

/// Whether the handshake has completed.
fn is_synchronized(state: State) -> bool {
    !matches!(state, State::Closed | State::Listen | State::SynSent | State::SynReceived)
}

/// Whether the state implies that the peer's FIN has arrived.
fn fin_received(state: State) -> bool {
    matches!(state, State::CloseWait | State::Closing | State::LastAck | State::TimeWait)
}
