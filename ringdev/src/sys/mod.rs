#![allow(unsafe_code)]
//! Ring-mapped ports of the operating system.
//!
//! Only Linux is supported, through `AF_PACKET` sockets with memory-mapped rings.
use core::fmt;
use std::io;

mod linux;
mod packet_ring;

pub use self::packet_ring::{PacketRing, PacketRx, PacketTx};

use crate::device::{DeviceError, RingDevice};
use smoltcp::wire::EthernetAddress;

/// An errno value.
///
/// This is used as the error representation of raw libc calls and converts into an
/// `std::io::Error` for everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Errno(pub libc::c_int);

#[derive(Clone, Copy)]
struct FdResult(pub libc::c_int);

#[derive(Clone, Copy)]
struct IoLenResult(pub libc::ssize_t);

/// Trait for interpreting integer return values.
trait LibcResult: Copy {
    fn is_fail(self) -> bool;

    fn errno(self) -> Result<(), Errno> {
        if self.is_fail() {
            Err(Errno::new())
        } else {
            Ok(())
        }
    }
}

impl Errno {
    /// The errno of the last failed call on this thread.
    pub fn new() -> Errno {
        Errno(unsafe { *libc::__errno_location() })
    }

    /// Whether the call would have blocked or lacked buffer space, both transient.
    pub fn is_transient(self) -> bool {
        self.0 == libc::EAGAIN || self.0 == libc::EWOULDBLOCK || self.0 == libc::ENOBUFS
    }
}

impl LibcResult for FdResult {
    fn is_fail(self) -> bool {
        self.0 == -1
    }
}

impl LibcResult for IoLenResult {
    fn is_fail(self) -> bool {
        self.0 == -1
    }
}

impl From<Errno> for io::Error {
    fn from(err: Errno) -> io::Error {
        io::Error::from_raw_os_error(err.0)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&io::Error::from_raw_os_error(self.0), f)
    }
}

impl std::error::Error for Errno {}

impl RingDevice<PacketRing> {
    /// Map the rings of the named interface and wrap them into a device.
    ///
    /// On failure everything opened so far has been released again.
    pub fn create(
        interface: &str,
        name: &str,
        hardware_addr: EthernetAddress,
    ) -> Result<Self, DeviceError> {
        let port = PacketRing::open(interface)?;
        Ok(RingDevice::with_port(port, interface, name, hardware_addr))
    }
}
