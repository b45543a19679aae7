//! Memory-mapped `AF_PACKET` rings.
//!
//! The socket is configured with `TPACKET_V2` receive and transmit rings which are mapped into a
//! single region, the receive ring first. Every slot starts with a `tpacket2_hdr` whose status
//! word transfers ownership of the slot between kernel and user space.
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU32, Ordering};
use core::{mem, slice};
use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::debug;

use super::linux::{self, tpacket2_hdr, tpacket_req};
use super::{Errno, FdResult, IoLenResult, LibcResult};
use crate::device::DeviceError;
use crate::port::{RingPort, RxRing, TxRing};

/// Bytes per frame slot, header included.
const FRAME_SIZE: usize = 2048;
/// Bytes per block, a multiple of both the page and the frame size.
const BLOCK_SIZE: usize = 1 << 16;
/// Slots per ring.
const FRAME_COUNT: usize = 256;

/// Receive and transmit rings of one interface.
pub struct PacketRing {
    rx: PacketRx,
    tx: PacketTx,
    // Dropped in this order: unmap, then close.
    mapping: Option<Mapping>,
    fd: Option<Fd>,
}

/// The receive ring of a [`PacketRing`].
pub struct PacketRx {
    slots: Slots,
    head: usize,
}

/// The transmit ring of a [`PacketRing`].
pub struct PacketTx {
    slots: Slots,
    head: usize,
    /// Frames handed to the ring since the last flush.
    queued: usize,
    fd: RawFd,
}

/// An owned packet socket descriptor.
struct Fd(libc::c_int);

/// An owned mapping of both rings.
struct Mapping {
    base: NonNull<u8>,
    len: usize,
}

/// Frame slots within the mapping.
struct Slots {
    base: *mut u8,
    frame_size: usize,
    /// Zero once the mapping is gone.
    frame_nr: usize,
}

fn setup<'a>(interface: &'a str, step: &'static str) -> impl FnOnce(Errno) -> DeviceError + 'a {
    move |err| DeviceError::Setup {
        interface: interface.to_owned(),
        step,
        source: err.into(),
    }
}

impl PacketRing {
    /// Open a packet socket on the named interface and map its rings.
    pub fn open(interface: &str) -> Result<Self, DeviceError> {
        let invalid = || DeviceError::InvalidName(interface.to_owned());
        if interface.is_empty() || interface.len() >= libc::IF_NAMESIZE {
            return Err(invalid());
        }
        let name = CString::new(interface).map_err(|_| invalid())?;

        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(DeviceError::NoSuchInterface(interface.to_owned()));
        }

        let fd = Fd::socket().map_err(setup(interface, "open a packet socket"))?;
        fd.set_option(linux::PACKET_VERSION, &linux::TPACKET_V2)
            .map_err(setup(interface, "select TPACKET_V2"))?;

        let req = tpacket_req::new(BLOCK_SIZE, FRAME_SIZE, FRAME_COUNT);
        fd.set_option(linux::PACKET_RX_RING, &req)
            .map_err(setup(interface, "request the receive ring"))?;
        fd.set_option(linux::PACKET_TX_RING, &req)
            .map_err(setup(interface, "request the transmit ring"))?;

        let ring_len = req.ring_len();
        let mapping = Mapping::new(&fd, 2 * ring_len)
            .map_err(setup(interface, "map the rings"))?;
        fd.bind(ifindex as libc::c_int)
            .map_err(setup(interface, "bind to the interface"))?;

        let base = mapping.base.as_ptr();
        let rx = PacketRx {
            slots: Slots {
                base,
                frame_size: FRAME_SIZE,
                frame_nr: FRAME_COUNT,
            },
            head: 0,
        };
        let tx = PacketTx {
            slots: Slots {
                // SAFETY: the mapping holds both rings back to back.
                base: unsafe { base.add(ring_len) },
                frame_size: FRAME_SIZE,
                frame_nr: FRAME_COUNT,
            },
            head: 0,
            queued: 0,
            fd: fd.0,
        };

        debug!(interface, ifindex, frames = FRAME_COUNT, frame_size = FRAME_SIZE, "rings mapped");

        Ok(PacketRing {
            rx,
            tx,
            mapping: Some(mapping),
            fd: Some(fd),
        })
    }
}

impl AsRawFd for PacketRing {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, |fd| fd.0)
    }
}

impl RingPort for PacketRing {
    type Rx = PacketRx;
    type Tx = PacketTx;

    fn poll_readable(&mut self) -> io::Result<bool> {
        let fd = match &self.fd {
            Some(fd) => fd.0,
            None => return Ok(false),
        };

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        let res = unsafe { libc::poll(&mut pollfd, 1, 0) };
        match FdResult(res).errno() {
            Ok(()) => Ok(res > 0 && pollfd.revents & libc::POLLIN != 0),
            Err(Errno(libc::EINTR)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn split(&mut self) -> (&mut PacketRx, &mut PacketTx) {
        (&mut self.rx, &mut self.tx)
    }

    fn close(&mut self) {
        self.rx.slots.disable();
        self.tx.slots.disable();
        self.mapping.take();
        self.fd.take();
    }
}

impl RxRing for PacketRx {
    fn pending(&self, max: usize) -> usize {
        let limit = max.min(self.slots.frame_nr);
        let mut count = 0;
        while count < limit {
            let index = (self.head + count) % self.slots.frame_nr;
            if self.slots.status(index).load(Ordering::Acquire) & linux::TP_STATUS_USER == 0 {
                break;
            }
            count += 1;
        }
        count
    }

    fn next_frame<R, F>(&mut self, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        while self.slots.frame_nr > 0 {
            let index = self.head;
            let status = self.slots.status(index);
            if status.load(Ordering::Acquire) & linux::TP_STATUS_USER == 0 {
                break;
            }

            self.head = (index + 1) % self.slots.frame_nr;

            let slot = self.slots.slot(index);
            let hdr = slot as *const tpacket2_hdr;
            // SAFETY: the slot belongs to user space until its status is reset.
            let (mac, snaplen, pkttype) = unsafe {
                (
                    ptr::addr_of!((*hdr).tp_mac).read_volatile() as usize,
                    ptr::addr_of!((*hdr).tp_snaplen).read_volatile() as usize,
                    slot.add(linux::SOCKADDR_OFFSET + linux::SLL_PKTTYPE_OFFSET).read_volatile(),
                )
            };

            // Frames of other local senders are not for us.
            if pkttype == linux::PACKET_OUTGOING || mac + snaplen > self.slots.frame_size {
                status.store(linux::TP_STATUS_KERNEL, Ordering::Release);
                continue;
            }

            // SAFETY: in bounds of the slot, checked above.
            let frame = unsafe { slice::from_raw_parts_mut(slot.add(mac), snaplen) };
            let result = f(frame);
            status.store(linux::TP_STATUS_KERNEL, Ordering::Release);
            return Ok(result);
        }

        Err(f)
    }
}

impl TxRing for PacketTx {
    fn slot_size(&self) -> usize {
        self.slots.frame_size - linux::TX_DATA_OFFSET
    }

    fn has_space(&self) -> bool {
        if self.slots.frame_nr == 0 {
            return false;
        }

        let busy = linux::TP_STATUS_SEND_REQUEST | linux::TP_STATUS_SENDING;
        self.slots.status(self.head).load(Ordering::Acquire) & busy == linux::TP_STATUS_AVAILABLE
    }

    fn fill_slot<R, F>(&mut self, len: usize, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        if len > self.slot_size() || !self.has_space() {
            return Err(f);
        }

        let index = self.head;
        let slot = self.slots.slot(index);
        // SAFETY: the slot is available to user space and the data fits its size.
        let data = unsafe { slice::from_raw_parts_mut(slot.add(linux::TX_DATA_OFFSET), len) };
        let result = f(data);

        unsafe {
            let hdr = slot as *mut tpacket2_hdr;
            ptr::addr_of_mut!((*hdr).tp_len).write_volatile(len as u32);
        }
        self.slots.status(index).store(linux::TP_STATUS_SEND_REQUEST, Ordering::Release);

        self.head = (index + 1) % self.slots.frame_nr;
        self.queued += 1;
        Ok(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.queued == 0 || self.slots.frame_nr == 0 {
            return Ok(());
        }

        let res = unsafe {
            libc::sendto(self.fd, ptr::null(), 0, libc::MSG_DONTWAIT, ptr::null(), 0)
        };

        match IoLenResult(res).errno() {
            Ok(()) => {
                self.queued = 0;
                Ok(())
            },
            Err(err) if err.is_transient() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Slots {
    fn slot(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.frame_nr);
        // SAFETY: slots are laid out back to back within the ring.
        unsafe { self.base.add(index * self.frame_size) }
    }

    fn status(&self, index: usize) -> &AtomicU32 {
        // SAFETY: the status word is the first, aligned, field of every slot and is only ever
        // accessed atomically by both kernel and us.
        unsafe { &*(self.slot(index) as *const AtomicU32) }
    }

    fn disable(&mut self) {
        self.frame_nr = 0;
    }
}

impl Fd {
    fn socket() -> Result<Fd, Errno> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                linux::ETH_P_ALL.to_be() as libc::c_int)
        };

        FdResult(fd).errno()?;
        Ok(Fd(fd))
    }

    fn set_option<T>(&self, name: libc::c_int, value: &T) -> Result<(), Errno> {
        let res = unsafe {
            libc::setsockopt(
                self.0,
                linux::SOL_PACKET,
                name,
                value as *const T as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t)
        };

        FdResult(res).errno()
    }

    fn bind(&self, ifindex: libc::c_int) -> Result<(), Errno> {
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: linux::ETH_P_ALL.to_be(),
            sll_ifindex: ifindex,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };

        let res = unsafe {
            libc::bind(
                self.0,
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t)
        };

        FdResult(res).errno()
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe { libc::close(self.0); }
    }
}

impl Mapping {
    fn new(fd: &Fd, len: usize) -> Result<Self, Errno> {
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.0,
                0)
        };

        if base == libc::MAP_FAILED {
            return Err(Errno::new());
        }

        let base = NonNull::new(base as *mut u8).ok_or(Errno(libc::EINVAL))?;
        Ok(Mapping { base, len })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len); }
    }
}
