//! A packet device bridging ring-mapped packet I/O to a user-space TCP/IP stack.
//!
//! ## Structure
//!
//! A [`RingPort`] is a connection to the receive and transmit rings of a network interface. The
//! rings are shared with the kernel (or, for the [`loopback`] module, with another port) and
//! frames are accessed in place. There is no intermediate packet queue in this library.
//!
//! The [`RingDevice`] wraps exactly one port and exposes it to the protocol stack with three
//! capabilities:
//!
//! * `send`: inject one frame into the transmit ring.
//! * `poll`: a non-blocking readiness check that arms at most `budget` received frames for
//!   ingestion within the current tick.
//! * `destroy`: release the rings. Idempotent, and also performed on drop.
//!
//! The protocol stack itself is `smoltcp`, which pulls frames from the device through its
//! `phy::Device` trait. Received frames are handed to the stack directly from their ring slot,
//! outgoing frames are serialized directly into a transmit slot.
//!
//! ## Budget
//!
//! The whole stack runs on one cooperative thread. A single busy interface must not stall other
//! work of the same tick, so ingestion is bounded by the budget given to `poll`. Frames beyond
//! the budget stay in the ring until the next tick.
#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod device;
pub mod loopback;
mod port;
#[cfg(target_os = "linux")]
pub mod sys;

pub use self::device::{Counter, DeviceError, RingDevice, RxToken, Stats, TxToken};
pub use self::port::{RingPort, RxRing, TxRing};
