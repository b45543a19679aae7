//! The contract of a ring-mapped packet connection.
use std::io;

/// A connection to the receive and transmit rings of one interface.
///
/// The port is the sole owner of its rings. Both rings can be borrowed at the same time, which
/// is what allows the stack to answer a received frame while it still looks at it.
pub trait RingPort {
    /// The receive half.
    type Rx: RxRing;
    /// The transmit half.
    type Tx: TxRing;

    /// Check whether received frames are pending, without ever blocking.
    fn poll_readable(&mut self) -> io::Result<bool>;

    /// Borrow both rings.
    fn split(&mut self) -> (&mut Self::Rx, &mut Self::Tx);

    /// Release the rings.
    ///
    /// Afterwards the rings report no frames and no space. Calling this again has no effect.
    fn close(&mut self);
}

/// The receive ring of a port.
pub trait RxRing {
    /// The number of received frames, counting no further than `max`.
    fn pending(&self, max: usize) -> usize;

    /// Hand the oldest received frame to `f` in place, then return its slot to the ring.
    ///
    /// The callback is given back when no frame is ready.
    fn next_frame<R, F>(&mut self, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut [u8]) -> R;

    /// Hand up to `budget` frames to `ingest`.
    ///
    /// Returns the number of frames processed. The protocol stack does not go through here, it
    /// takes single frames with [`next_frame`] once they were armed by the device.
    ///
    /// [`next_frame`]: RxRing::next_frame
    fn dispatch(&mut self, budget: usize, mut ingest: impl FnMut(&mut [u8])) -> usize {
        let mut count = 0;
        while count < budget {
            if self.next_frame(|frame| ingest(frame)).is_err() {
                break;
            }
            count += 1;
        }
        count
    }
}

/// The transmit ring of a port.
pub trait TxRing {
    /// The largest frame that fits into one slot.
    fn slot_size(&self) -> usize;

    /// Whether a slot is free for another frame.
    fn has_space(&self) -> bool;

    /// Let `f` write a frame of `len` bytes into the next free slot and queue it.
    ///
    /// The callback is given back when no slot is free or the frame does not fit.
    fn fill_slot<R, F>(&mut self, len: usize, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut [u8]) -> R;

    /// Hand all queued frames to the interface.
    ///
    /// Must not block. A transmit ring that is momentarily busy is not an error, its frames are
    /// pushed with the next flush.
    fn flush(&mut self) -> io::Result<()>;

    /// Copy a frame into the ring.
    ///
    /// Returns the number of bytes accepted, zero if the ring is full. Frames of the protocol
    /// stack are serialized in place with [`fill_slot`] instead.
    ///
    /// [`fill_slot`]: TxRing::fill_slot
    fn inject(&mut self, frame: &[u8]) -> usize {
        match self.fill_slot(frame.len(), |slot| slot.copy_from_slice(frame)) {
            Ok(()) => frame.len(),
            Err(_) => 0,
        }
    }
}
