//! The echo session state machine.
//!
//! There are no named states. What the session does next follows from the occupancy of its
//! [`TransferBuffer`] and from the [`FlowFlags`] it owes the stream. Each event is handled on its
//! own and never blocks; a direction that can not make progress sets its flag and waits for the
//! next event.
use bitflags::bitflags;
use smoltcp::wire::IpEndpoint;
use tracing::{debug, info, trace};

use crate::buffer::TransferBuffer;
use crate::event::Event;
use crate::stream::{SocketError, Stream};
use crate::BSIZE;

bitflags! {
    /// Conditions currently owed to the stream.
    ///
    /// A flag is only set after an attempt that made no progress and cleared once progress
    /// resumes.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FlowFlags: u8 {
        /// The last read attempt got nothing, or there was no room to read into.
        const READ_BLOCKED = 1 << 0;
        /// The last flush wrote nothing and must be retried.
        const WRITE_BLOCKED = 1 << 1;
        /// The peer closed its side and ours is to follow once everything is echoed.
        const HALF_CLOSE_PENDING = 1 << 2;
    }
}

/// What the driver has to do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Nothing.
    Continue,
    /// The connection is done, terminate after the grace period.
    ScheduleExit,
    /// The connection failed, terminate now.
    Fatal(SocketError),
}

/// Byte counters of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes read from the peer.
    pub received: u64,
    /// Bytes written back to the peer.
    pub echoed: u64,
}

/// The state of the single echo connection.
pub struct Session {
    buffer: TransferBuffer<BSIZE>,
    flags: FlowFlags,
    peer: Option<IpEndpoint>,
    write_closed: bool,
    stats: SessionStats,
}

impl Session {
    /// A session awaiting its connection, with an empty buffer.
    pub fn new() -> Self {
        Session {
            buffer: TransferBuffer::new(),
            flags: FlowFlags::empty(),
            peer: None,
            write_closed: false,
            stats: SessionStats::default(),
        }
    }

    /// The flow conditions currently owed.
    pub fn flags(&self) -> FlowFlags {
        self.flags
    }

    /// The bytes waiting to be echoed.
    pub fn buffer(&self) -> &TransferBuffer<BSIZE> {
        &self.buffer
    }

    /// The remote endpoint, once connected.
    pub fn peer(&self) -> Option<IpEndpoint> {
        self.peer
    }

    /// Byte counters so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Whether our sending side has been closed.
    pub fn is_write_closed(&self) -> bool {
        self.write_closed
    }

    /// Handle one event of the stream.
    pub fn handle<S: Stream + ?Sized>(&mut self, event: Event, stream: &mut S) -> Step {
        trace!(?event, flags = ?self.flags, "wakeup");

        match event {
            Event::Connected => {
                self.accept(stream);
                Step::Continue
            },
            Event::Readable => self.on_readable(stream),
            Event::Writable => self.on_writable(stream),
            Event::Closing => {
                info!("peer closed its sending side");
                self.flags.insert(FlowFlags::HALF_CLOSE_PENDING);
                self.try_half_close(stream);
                Step::Continue
            },
            Event::Closed => {
                info!(
                    received = self.stats.received,
                    echoed = self.stats.echoed,
                    "socket closed",
                );
                Step::ScheduleExit
            },
            Event::Errored => Step::Fatal(SocketError::Reset),
        }
    }

    /// Echo as much of the buffer as the stream takes.
    ///
    /// Returns the bytes written. Does nothing when the buffer is empty.
    pub fn flush<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<usize, SocketError> {
        let mut written = 0;

        while !self.buffer.is_empty() {
            match stream.write(self.buffer.pending())? {
                0 => break,
                n => {
                    self.buffer.advance(n);
                    written += n;
                },
            }
        }

        self.stats.echoed += written as u64;
        Ok(written)
    }

    fn accept<S: Stream + ?Sized>(&mut self, stream: &mut S) {
        self.peer = stream.peer();
        stream.set_nodelay(true);

        match self.peer {
            Some(peer) => info!(%peer, "connection established"),
            None => info!("connection established"),
        }
    }

    fn on_readable<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Step {
        if self.buffer.is_full() {
            self.set(FlowFlags::READ_BLOCKED);
        }

        while !self.buffer.is_full() {
            match stream.read(self.buffer.spare_mut()) {
                Ok(0) => {
                    self.set(FlowFlags::READ_BLOCKED);
                    break;
                },
                Ok(n) => {
                    self.buffer.commit(n);
                    self.stats.received += n as u64;
                    self.clear(FlowFlags::READ_BLOCKED);
                },
                Err(err) => return Step::Fatal(err),
            }
        }

        // A writable notification came and went while there was nothing to echo.
        if self.flags.contains(FlowFlags::WRITE_BLOCKED) {
            return self.on_writable(stream);
        }

        self.try_half_close(stream);
        Step::Continue
    }

    fn on_writable<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Step {
        match self.flush(stream) {
            Ok(0) => self.set(FlowFlags::WRITE_BLOCKED),
            Ok(_) => self.clear(FlowFlags::WRITE_BLOCKED),
            Err(err) => return Step::Fatal(err),
        }

        self.try_half_close(stream);
        Step::Continue
    }

    /// Close our sending side once the peer has closed and everything is echoed.
    fn try_half_close<S: Stream + ?Sized>(&mut self, stream: &mut S) {
        if !self.flags.contains(FlowFlags::HALF_CLOSE_PENDING)
            || !self.buffer.is_empty()
            || stream.has_unread()
        {
            return;
        }

        stream.shutdown_write();
        self.flags.remove(FlowFlags::HALF_CLOSE_PENDING);
        self.write_closed = true;
        info!("called shutdown on the sending side");
    }

    fn set(&mut self, flag: FlowFlags) {
        if !self.flags.contains(flag) {
            self.flags.insert(flag);
            debug!(?flag, "flow blocked");
        }
    }

    fn clear(&mut self, flag: FlowFlags) {
        if self.flags.contains(flag) {
            self.flags.remove(flag);
            debug!(?flag, "flow resumed");
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// A stream following a script of arriving fragments and available send room.
    #[derive(Default)]
    struct Scripted {
        fragments: VecDeque<Vec<u8>>,
        room: VecDeque<usize>,
        echoed: Vec<u8>,
        writes: usize,
        nodelay: bool,
        shut: bool,
    }

    impl Scripted {
        fn arrive(&mut self, data: &[u8]) {
            self.fragments.push_back(data.to_vec());
        }

        /// Allow the next write to take `bytes`.
        fn allow(&mut self, bytes: usize) {
            self.room.push_back(bytes);
        }
    }

    impl Stream for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
            let fragment = match self.fragments.front_mut() {
                Some(fragment) => fragment,
                None => return Ok(0),
            };

            let n = fragment.len().min(buf.len());
            buf[..n].copy_from_slice(&fragment[..n]);
            fragment.drain(..n);
            if fragment.is_empty() {
                self.fragments.pop_front();
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
            if self.shut {
                return Err(SocketError::Write);
            }

            self.writes += 1;
            let n = self.room.pop_front().unwrap_or(0).min(buf.len());
            self.echoed.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn shutdown_write(&mut self) {
            self.shut = true;
        }

        fn set_nodelay(&mut self, nodelay: bool) {
            self.nodelay = nodelay;
        }

        fn peer(&self) -> Option<IpEndpoint> {
            None
        }

        fn has_unread(&self) -> bool {
            !self.fragments.is_empty()
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// A small deterministic generator for fragment sizes.
    struct Lcg(u64);

    impl Lcg {
        fn below(&mut self, bound: usize) -> usize {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound
        }
    }

    #[test]
    fn connect_disables_coalescing() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        assert_eq!(session.handle(Event::Connected, &mut stream), Step::Continue);
        assert!(stream.nodelay);
    }

    #[test]
    fn echo_abc() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        stream.arrive(b"abc");
        stream.allow(usize::MAX);

        session.handle(Event::Connected, &mut stream);
        session.handle(Event::Readable, &mut stream);
        assert_eq!(session.buffer().pending(), b"abc");
        assert!(session.flags().contains(FlowFlags::READ_BLOCKED));

        session.handle(Event::Writable, &mut stream);
        assert_eq!(stream.echoed, b"abc");
        assert!(session.buffer().is_empty());
        assert!(!session.flags().contains(FlowFlags::WRITE_BLOCKED));

        session.handle(Event::Closing, &mut stream);
        assert!(stream.shut);
        assert_eq!(session.handle(Event::Closed, &mut stream), Step::ScheduleExit);
        assert_eq!(session.stats(), SessionStats { received: 3, echoed: 3 });
    }

    #[test]
    fn flush_on_empty_buffer_is_noop() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        stream.allow(100);

        let flags = session.flags();
        assert_eq!(session.flush(&mut stream), Ok(0));
        assert_eq!(stream.writes, 0);
        assert_eq!(session.flags(), flags);
        assert_eq!((session.buffer().consumed(), session.buffer().filled()), (0, 0));
    }

    #[test]
    fn blocked_write_retries_from_same_offset() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        stream.arrive(b"hello world");
        session.handle(Event::Readable, &mut stream);

        stream.allow(5);
        session.handle(Event::Writable, &mut stream);
        assert_eq!(session.buffer().consumed(), 5);
        assert!(!session.flags().contains(FlowFlags::WRITE_BLOCKED));

        // No room at all.
        session.handle(Event::Writable, &mut stream);
        assert!(session.flags().contains(FlowFlags::WRITE_BLOCKED));
        assert_eq!(session.buffer().consumed(), 5);

        stream.allow(usize::MAX);
        session.handle(Event::Writable, &mut stream);
        assert!(!session.flags().contains(FlowFlags::WRITE_BLOCKED));
        assert_eq!(stream.echoed, b"hello world");
    }

    #[test]
    fn readable_flushes_when_write_was_blocked() {
        let mut session = Session::new();
        let mut stream = Scripted::default();

        // Writable with nothing to echo leaves the write owed.
        session.handle(Event::Writable, &mut stream);
        assert!(session.flags().contains(FlowFlags::WRITE_BLOCKED));

        stream.arrive(b"late");
        stream.allow(usize::MAX);
        session.handle(Event::Readable, &mut stream);
        assert_eq!(stream.echoed, b"late");
        assert!(!session.flags().contains(FlowFlags::WRITE_BLOCKED));
    }

    #[test]
    fn full_buffer_applies_backpressure() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        let input = pattern(BSIZE + 10);
        stream.arrive(&input);

        session.handle(Event::Readable, &mut stream);
        assert_eq!(session.buffer().filled(), BSIZE);
        assert!(session.buffer().is_full());

        // Reading again must not overflow and marks reads as blocked.
        session.handle(Event::Readable, &mut stream);
        assert_eq!(session.buffer().filled(), BSIZE);
        assert!(session.flags().contains(FlowFlags::READ_BLOCKED));
        assert!(stream.has_unread());

        // A partial echo does not make room yet.
        stream.allow(1000);
        session.handle(Event::Writable, &mut stream);
        session.handle(Event::Readable, &mut stream);
        assert_eq!(session.buffer().filled(), BSIZE);

        stream.allow(usize::MAX);
        session.handle(Event::Writable, &mut stream);
        session.handle(Event::Readable, &mut stream);
        assert_eq!(session.buffer().filled(), 10);

        stream.allow(usize::MAX);
        session.handle(Event::Writable, &mut stream);
        assert_eq!(stream.echoed, input);
    }

    #[test]
    fn round_trip_over_any_fragmentation() {
        for seed in 1..=20u64 {
            let mut rng = Lcg(seed);
            let input = pattern(3 * BSIZE + rng.below(BSIZE));

            let mut session = Session::new();
            let mut stream = Scripted::default();
            session.handle(Event::Connected, &mut stream);

            let mut offset = 0;
            while offset < input.len() {
                let len = (1 + rng.below(700)).min(input.len() - offset);
                stream.arrive(&input[offset..offset + len]);
                offset += len;

                for _ in 0..rng.below(3) {
                    stream.allow(rng.below(900));
                }

                session.handle(Event::Readable, &mut stream);
                session.handle(Event::Writable, &mut stream);

                let buffer = session.buffer();
                assert!(buffer.consumed() <= buffer.filled());
                assert!(buffer.filled() <= BSIZE);
            }

            while stream.echoed.len() < input.len() {
                stream.allow(rng.below(900) + 1);
                session.handle(Event::Readable, &mut stream);
                session.handle(Event::Writable, &mut stream);
            }

            assert_eq!(stream.echoed, input, "seed {}", seed);
        }
    }

    #[test]
    fn half_close_waits_for_echo() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        stream.arrive(b"pending");
        session.handle(Event::Readable, &mut stream);

        // Peer half-closes while the buffer still has room but data is unechoed.
        session.handle(Event::Closing, &mut stream);
        assert!(!stream.shut);
        assert!(session.flags().contains(FlowFlags::HALF_CLOSE_PENDING));

        stream.allow(usize::MAX);
        session.handle(Event::Writable, &mut stream);
        assert!(stream.shut);
        assert!(session.is_write_closed());
        assert!(!session.flags().contains(FlowFlags::HALF_CLOSE_PENDING));
        assert_eq!(stream.echoed, b"pending");
    }

    #[test]
    fn half_close_with_empty_buffer_is_immediate() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        session.handle(Event::Connected, &mut stream);
        session.handle(Event::Closing, &mut stream);
        assert!(stream.shut);
    }

    #[test]
    fn errors_are_fatal() {
        let mut session = Session::new();
        let mut stream = Scripted::default();
        assert_eq!(
            session.handle(Event::Errored, &mut stream),
            Step::Fatal(SocketError::Reset)
        );

        stream.arrive(b"x");
        session.handle(Event::Readable, &mut stream);
        stream.shut = true;
        assert_eq!(
            session.handle(Event::Writable, &mut stream),
            Step::Fatal(SocketError::Write)
        );
    }
}
