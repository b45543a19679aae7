use std::cell::Cell;
use std::io;

use smoltcp::phy::{self, DeviceCapabilities, Medium};
use smoltcp::time::Instant;
use smoltcp::wire::EthernetAddress;
use tracing::{debug, info, trace, warn};

use crate::port::{RingPort, RxRing, TxRing};

/// The largest Ethernet frame handed to the stack, without frame check sequence.
const ETHERNET_MTU: usize = 1514;

/// A packet device over a ring-mapped port.
///
/// The device is the exclusive owner of its port. Received frames are only handed to the stack
/// after they have been armed by [`poll`], which bounds the work of each tick.
///
/// [`poll`]: #method.poll
pub struct RingDevice<P: RingPort> {
    name: String,
    interface: String,
    hardware_addr: EthernetAddress,
    /// Per-frame overhead the stack must leave room for. Always zero for packet rings.
    overhead: usize,
    mtu: usize,
    port: Option<P>,
    /// Frames the stack may still ingest in this tick.
    armed: usize,
    stats: Stats,
}

/// Traffic counters of a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Frames handed to the stack.
    pub rx: Counter,
    /// Frames produced by the stack or injected with `send`.
    pub tx: Counter,
}

/// Counters of one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    /// Frames that went through.
    pub frames: u64,
    /// Bytes of all frames that went through.
    pub bytes: u64,
    /// Frames lost for lack of a slot or because they did not fit.
    pub dropped: u64,
}

/// Failure to bring up a device.
///
/// Any partially constructed state has already been released when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The interface name can not be passed to the OS.
    #[error("invalid interface name `{0}`")]
    InvalidName(String),
    /// There is no interface with that name.
    #[error("no interface named `{0}`")]
    NoSuchInterface(String),
    /// One step of mapping the rings failed.
    #[error("cannot {step} on `{interface}`: {source}")]
    Setup {
        /// The interface being opened.
        interface: String,
        /// What was attempted.
        step: &'static str,
        /// The error reported by the OS.
        #[source]
        source: io::Error,
    },
}

/// Gives one armed frame to the stack, straight from its receive slot.
pub struct RxToken<'a, R> {
    ring: &'a mut R,
    counter: &'a mut Counter,
}

/// Lets the stack write one frame straight into a transmit slot.
pub struct TxToken<'a, T> {
    ring: &'a mut T,
    counter: &'a mut Counter,
}

impl<P: RingPort> RingDevice<P> {
    /// Wrap an opened port.
    ///
    /// The `interface` is the OS name of the mapped interface, `name` is how this device is
    /// known within the stack.
    pub fn with_port(port: P, interface: &str, name: &str, hardware_addr: EthernetAddress) -> Self {
        let mut port = port;
        let slot_size = port.split().1.slot_size();

        info!(device = name, interface, hwaddr = %hardware_addr, "packet device ready");

        RingDevice {
            name: name.to_owned(),
            interface: interface.to_owned(),
            hardware_addr,
            overhead: 0,
            mtu: slot_size.min(ETHERNET_MTU),
            port: Some(port),
            armed: 0,
            stats: Stats::default(),
        }
    }

    /// The name of the device within the stack.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The OS name of the mapped interface.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The hardware address of the stack on this device.
    pub fn hardware_addr(&self) -> EthernetAddress {
        self.hardware_addr
    }

    /// The per-frame overhead.
    pub fn overhead(&self) -> usize {
        self.overhead
    }

    /// The largest frame this device transmits.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Traffic counters so far.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Whether the rings are still mapped.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Frames the stack may still ingest in the current tick.
    pub fn armed(&self) -> usize {
        self.armed
    }

    /// Inject a single frame into the transmit ring.
    ///
    /// Returns the number of bytes accepted. This is zero when the ring is full, the frame is
    /// larger than a slot, or the device has been destroyed. The caller may retry later.
    ///
    /// This is for frames built outside of the stack. The stack itself writes into transmit
    /// slots through its `phy::Device` tokens and never copies through here.
    pub fn send(&mut self, frame: &[u8]) -> usize {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return 0,
        };

        let (_, tx) = port.split();
        let sent = tx.inject(frame);
        if sent == 0 {
            self.stats.tx.dropped += 1;
        } else {
            self.stats.tx.frames += 1;
            self.stats.tx.bytes += sent as u64;
        }

        sent
    }

    /// Check for received frames and arm up to `budget` of them.
    ///
    /// Never blocks. When nothing is pending the budget is returned unchanged. Otherwise the
    /// armed frames are ingested by the stack during the current tick, each handed over in place
    /// from its ring slot, and the remaining budget is returned.
    pub fn poll(&mut self, budget: usize) -> usize {
        self.armed = 0;

        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return budget,
        };

        match port.poll_readable() {
            Ok(true) => (),
            Ok(false) => return budget,
            Err(err) => {
                warn!(device = %self.name, %err, "readiness check failed");
                return budget;
            },
        }

        let (rx, _) = port.split();
        self.armed = rx.pending(budget);
        trace!(device = %self.name, armed = self.armed, budget, "frames pending");

        budget.saturating_sub(self.armed)
    }

    /// Push frames queued by the stack to the interface.
    pub fn flush(&mut self) -> io::Result<()> {
        match self.port.as_mut() {
            Some(port) => port.split().1.flush(),
            None => Ok(()),
        }
    }

    /// Release the rings.
    ///
    /// Safe to call any number of times, including while unwinding an error.
    pub fn destroy(&mut self) {
        if let Some(mut port) = self.port.take() {
            port.close();
            self.armed = 0;
            debug!(device = %self.name, stats = ?self.stats, "device statistics");
            info!(device = %self.name, interface = %self.interface, "packet device closed");
        }
    }
}

impl<P: RingPort> Drop for RingDevice<P> {
    fn drop(&mut self) {
        self.destroy()
    }
}

impl<P: RingPort> phy::Device for RingDevice<P> {
    type RxToken<'a> = RxToken<'a, P::Rx> where Self: 'a;
    type TxToken<'a> = TxToken<'a, P::Tx> where Self: 'a;

    fn receive(&mut self, _: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        if self.armed == 0 {
            return None;
        }

        let port = self.port.as_mut()?;
        let (rx, tx) = port.split();
        if rx.pending(1) == 0 {
            self.armed = 0;
            return None;
        }

        self.armed -= 1;
        let rx = RxToken {
            ring: rx,
            counter: &mut self.stats.rx,
        };
        let tx = TxToken {
            ring: tx,
            counter: &mut self.stats.tx,
        };

        Some((rx, tx))
    }

    fn transmit(&mut self, _: Instant) -> Option<Self::TxToken<'_>> {
        let port = self.port.as_mut()?;
        let (_, tx) = port.split();
        if !tx.has_space() {
            return None;
        }

        Some(TxToken {
            ring: tx,
            counter: &mut self.stats.tx,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = self.mtu;
        caps
    }
}

impl<R: RxRing> phy::RxToken for RxToken<'_, R> {
    fn consume<T, F>(self, f: F) -> T
    where
        F: FnOnce(&mut [u8]) -> T,
    {
        let len = Cell::new(0);
        let result = self.ring.next_frame(|frame| {
            len.set(frame.len());
            f(frame)
        });

        match result {
            Ok(result) => {
                self.counter.frames += 1;
                self.counter.bytes += len.get() as u64;
                result
            },
            // The slot was armed but is gone. The stack drops an empty frame as malformed.
            Err(f) => {
                self.counter.dropped += 1;
                f(&mut [])
            },
        }
    }
}

impl<T: TxRing> phy::TxToken for TxToken<'_, T> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        match self.ring.fill_slot(len, f) {
            Ok(result) => {
                self.counter.frames += 1;
                self.counter.bytes += len as u64;
                result
            },
            Err(f) => {
                self.counter.dropped += 1;
                warn!(len, "no transmit slot, frame dropped");
                let mut scratch = vec![0; len];
                f(&mut scratch)
            },
        }
    }
}
