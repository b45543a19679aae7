//! Deferred termination.
//!
//! Ending the process right after the connection closed would drop frames that are still queued
//! in the transmit ring, including the final acknowledgement. The shutdown is instead armed with
//! a delay and fires from the loop once that delay has passed.
use smoltcp::time::{Duration, Instant};
use tracing::{debug, warn};

/// How the service ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// The connection closed in order and the grace period elapsed.
    Graceful,
}

/// A one-shot timer carrying the resource to release when it fires.
#[derive(Debug)]
pub struct DeferredShutdown<R> {
    state: State<R>,
}

#[derive(Debug)]
enum State<R> {
    Idle,
    Armed { deadline: Instant, resource: Option<R> },
    Fired,
}

impl<R> DeferredShutdown<R> {
    /// A timer that has not been armed.
    pub fn new() -> Self {
        DeferredShutdown { state: State::Idle }
    }

    /// Arm the timer to fire `delay` after `now`.
    ///
    /// Only the first call has an effect. Returns whether this call armed the timer.
    pub fn schedule(&mut self, now: Instant, delay: Duration, resource: Option<R>) -> bool {
        match self.state {
            State::Idle => {
                let deadline = now + delay;
                debug!(%deadline, "shutdown scheduled");
                self.state = State::Armed { deadline, resource };
                true
            },
            _ => {
                warn!("shutdown already scheduled");
                false
            },
        }
    }

    /// Whether the timer has been armed, fired or not.
    pub fn is_armed(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// When the timer fires, while it is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Armed { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    /// Fire the timer if its deadline has passed.
    ///
    /// Drops the resource and reports a graceful exit, exactly once.
    pub fn poll(&mut self, now: Instant) -> Option<ExitStatus> {
        match &self.state {
            State::Armed { deadline, .. } if now >= *deadline => (),
            _ => return None,
        }

        if let State::Armed { resource, .. } = core::mem::replace(&mut self.state, State::Fired) {
            drop(resource);
        }

        debug!("shutdown timer fired");
        Some(ExitStatus::Graceful)
    }
}

impl<R> Default for DeferredShutdown<R> {
    fn default() -> Self {
        DeferredShutdown::new()
    }
}
