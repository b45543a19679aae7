//! A single-connection TCP echo service on ring-mapped packet I/O.
//!
//! The service listens on one port. The first peer to connect gets every byte it sends echoed
//! back in order. When the peer closes its side, the service closes its own once everything has
//! been echoed and exits after a short grace period that lets the last frames leave the transmit
//! ring.
//!
//! Everything runs on one thread in a loop of cooperative ticks, see [`server`]. No operation of
//! a tick blocks: the device is polled with a zero timeout and socket reads and writes report a
//! would-block as zero bytes.
//!
//! The [`session`] module holds the per-connection state machine. It consumes [`event`]s derived
//! from the socket after each tick, one at a time in a fixed priority order.
#![warn(missing_docs)]

pub mod buffer;
pub mod config;
mod error;
pub mod event;
pub mod server;
pub mod session;
pub mod stream;
pub mod timer;

pub use self::error::Error;

/// Capacity of the echo transfer buffer.
pub const BSIZE: usize = 2048;
