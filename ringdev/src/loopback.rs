//! An in-memory cable between two ports.
//!
//! Each port owns a bounded transmit ring. Flushing moves its queued frames onto the wire where
//! they wait in the receive ring of the other port. A receive ring that is full drops further
//! frames, like a NIC that is not serviced in time.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use crate::port::{RingPort, RxRing, TxRing};

/// One end of an in-memory cable.
pub struct MemoryPort {
    rx: MemoryRx,
    tx: MemoryTx,
}

/// The receive half of a [`MemoryPort`].
pub struct MemoryRx {
    lane: Rc<RefCell<Lane>>,
    open: bool,
}

/// The transmit half of a [`MemoryPort`].
pub struct MemoryTx {
    staged: VecDeque<Vec<u8>>,
    slots: usize,
    slot_size: usize,
    lane: Rc<RefCell<Lane>>,
    open: bool,
}

/// Frames travelling in one direction.
struct Lane {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
    dropped: u64,
}

impl MemoryPort {
    /// Create two connected ports, each ring having `slots` slots of `slot_size` bytes.
    pub fn pair(slots: usize, slot_size: usize) -> (MemoryPort, MemoryPort) {
        let a_to_b = Lane::new(slots);
        let b_to_a = Lane::new(slots);

        let a = MemoryPort {
            rx: MemoryRx::new(b_to_a.clone()),
            tx: MemoryTx::new(a_to_b.clone(), slots, slot_size),
        };

        let b = MemoryPort {
            rx: MemoryRx::new(a_to_b),
            tx: MemoryTx::new(b_to_a, slots, slot_size),
        };

        (a, b)
    }

    /// Frames lost because the receive ring of this port was full.
    pub fn rx_dropped(&self) -> u64 {
        self.rx.lane.borrow().dropped
    }
}

impl Lane {
    fn new(capacity: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Lane {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }))
    }
}

impl MemoryRx {
    fn new(lane: Rc<RefCell<Lane>>) -> Self {
        MemoryRx { lane, open: true }
    }
}

impl MemoryTx {
    fn new(lane: Rc<RefCell<Lane>>, slots: usize, slot_size: usize) -> Self {
        MemoryTx {
            staged: VecDeque::with_capacity(slots),
            slots,
            slot_size,
            lane,
            open: true,
        }
    }
}

impl RingPort for MemoryPort {
    type Rx = MemoryRx;
    type Tx = MemoryTx;

    fn poll_readable(&mut self) -> io::Result<bool> {
        Ok(self.rx.pending(1) > 0)
    }

    fn split(&mut self) -> (&mut MemoryRx, &mut MemoryTx) {
        (&mut self.rx, &mut self.tx)
    }

    fn close(&mut self) {
        self.rx.open = false;
        self.tx.open = false;
        self.tx.staged.clear();
    }
}

impl RxRing for MemoryRx {
    fn pending(&self, max: usize) -> usize {
        if !self.open {
            return 0;
        }

        self.lane.borrow().frames.len().min(max)
    }

    fn next_frame<R, F>(&mut self, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        if !self.open {
            return Err(f);
        }

        let frame = self.lane.borrow_mut().frames.pop_front();
        match frame {
            Some(mut frame) => Ok(f(&mut frame)),
            None => Err(f),
        }
    }
}

impl TxRing for MemoryTx {
    fn slot_size(&self) -> usize {
        self.slot_size
    }

    fn has_space(&self) -> bool {
        self.open && self.staged.len() < self.slots
    }

    fn fill_slot<R, F>(&mut self, len: usize, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        if !self.has_space() || len > self.slot_size {
            return Err(f);
        }

        let mut frame = vec![0; len];
        let result = f(&mut frame);
        self.staged.push_back(frame);
        Ok(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut lane = self.lane.borrow_mut();
        for frame in self.staged.drain(..) {
            if lane.frames.len() < lane.capacity {
                lane.frames.push_back(frame);
            } else {
                lane.dropped += 1;
            }
        }

        Ok(())
    }
}
