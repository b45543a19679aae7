//! The fixed-capacity buffer between reading and echoing.

/// Bytes read from the peer that still have to be echoed.
///
/// `consumed <= filled <= N` holds at all times. The buffer does not compact: capacity is only
/// regained once everything has been echoed, at which point both cursors return to zero.
pub struct TransferBuffer<const N: usize> {
    storage: [u8; N],
    /// Bytes already echoed.
    consumed: usize,
    /// Bytes currently valid.
    filled: usize,
}

impl<const N: usize> TransferBuffer<N> {
    /// An empty buffer.
    pub fn new() -> Self {
        TransferBuffer {
            storage: [0; N],
            consumed: 0,
            filled: 0,
        }
    }

    /// The fixed capacity, `N`.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Offset of the first byte not yet echoed.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Number of valid bytes, echoed or not.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Whether no further byte can be read in.
    pub fn is_full(&self) -> bool {
        self.filled == N
    }

    /// Whether nothing is left to echo.
    pub fn is_empty(&self) -> bool {
        self.consumed == self.filled
    }

    /// The free room behind the valid bytes.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.filled..]
    }

    /// Mark `n` bytes of the spare room as valid.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= N - self.filled, "commit beyond capacity");
        self.filled += n.min(N - self.filled);
    }

    /// The bytes not yet echoed.
    pub fn pending(&self) -> &[u8] {
        &self.storage[self.consumed..self.filled]
    }

    /// Mark `n` pending bytes as echoed.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.filled - self.consumed, "advance beyond valid bytes");
        self.consumed += n.min(self.filled - self.consumed);
        if self.consumed == self.filled {
            self.consumed = 0;
            self.filled = 0;
        }
    }
}

impl<const N: usize> Default for TransferBuffer<N> {
    fn default() -> Self {
        TransferBuffer::new()
    }
}
