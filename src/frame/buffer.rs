//! Per-session receive buffer.
//!
//! An `Accumulator` is a fixed-capacity byte region with two cursors:
//!
//! ```text
//! 0            read           write              capacity
//! |  consumed  |   unread     |      spare       |
//! ```
//!
//! Bytes are appended at `write` (either copied in, or read from a socket
//! directly into [`Accumulator::spare_mut`] and then committed) and consumed
//! from `read`. [`Accumulator::compact`] moves the unread tail to the front.
//!
//! The capacity is a ceiling. The buffer never grows, so a peer that keeps
//! sending without completing a frame runs out of room instead of memory.

/// Fixed-capacity byte accumulator with explicit cursors.
#[derive(Debug)]
pub struct Accumulator {
    buf: Box<[u8]>,
    read: usize,
    write: usize,
}

impl Accumulator {
    /// Create an empty accumulator of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Total size of the backing region.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Bytes that can be appended without compacting.
    pub fn spare_len(&self) -> usize {
        self.buf.len() - self.write
    }

    /// Unread bytes.
    pub fn readable(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// Writable region after the write cursor.
    ///
    /// Fill it and call [`commit`](Self::commit) with the number of bytes written.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.write..]
    }

    /// Mark `n` bytes of the spare region as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.spare_len(), "commit past capacity");
        self.write = (self.write + n).min(self.buf.len());
    }

    /// Copy as much of `data` as fits. Returns the number of bytes taken.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.spare_len());
        self.buf[self.write..self.write + n].copy_from_slice(&data[..n]);
        self.write += n;
        n
    }

    /// Advance the read cursor by `n` bytes.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consume past write cursor");
        self.read = (self.read + n).min(self.write);
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
    }

    /// Move the unread tail to the start of the buffer.
    pub fn compact(&mut self) {
        if self.read == 0 {
            return;
        }
        self.buf.copy_within(self.read..self.write, 0);
        self.write -= self.read;
        self.read = 0;
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_consume() {
        let mut acc = Accumulator::new(16);

        assert_eq!(acc.capacity(), 16);
        assert!(acc.is_empty());

        assert_eq!(acc.extend_from_slice(b"hello world"), 11);
        assert_eq!(acc.len(), 11);
        assert_eq!(acc.readable(), b"hello world");

        acc.consume(6);
        assert_eq!(acc.readable(), b"world");
        assert_eq!(acc.spare_len(), 5);
    }

    #[test]
    fn test_extend_stops_at_capacity() {
        let mut acc = Accumulator::new(4);

        assert_eq!(acc.extend_from_slice(b"abcdef"), 4);
        assert_eq!(acc.readable(), b"abcd");
        assert_eq!(acc.extend_from_slice(b"gh"), 0);
    }

    #[test]
    fn test_compact_preserves_tail() {
        let mut acc = Accumulator::new(8);
        acc.extend_from_slice(b"abcdefgh");
        acc.consume(5);
        assert_eq!(acc.spare_len(), 0);

        acc.compact();

        assert_eq!(acc.readable(), b"fgh");
        assert_eq!(acc.spare_len(), 5);

        // Appending after compaction continues the tail
        acc.extend_from_slice(b"ij");
        assert_eq!(acc.readable(), b"fghij");
    }

    #[test]
    fn test_full_consume_resets_cursors() {
        let mut acc = Accumulator::new(8);
        acc.extend_from_slice(b"abcd");
        acc.consume(4);

        assert!(acc.is_empty());
        assert_eq!(acc.spare_len(), 8);
    }

    #[test]
    fn test_spare_mut_and_commit() {
        let mut acc = Accumulator::new(8);
        acc.spare_mut()[..3].copy_from_slice(b"xyz");
        acc.commit(3);

        assert_eq!(acc.readable(), b"xyz");

        acc.clear();
        assert!(acc.is_empty());
        assert_eq!(acc.spare_len(), 8);
    }
}
