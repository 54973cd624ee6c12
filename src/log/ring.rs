//! Circular byte buffer backing the write buffer.
//!
//! Not synchronized; the write buffer guards it with its mutex.

/// Fixed-capacity circular byte buffer.
///
/// Bytes are appended at `append_head` and consumed from `write_head`.
/// Occupancy is tracked explicitly so a full ring is distinguishable
/// from an empty one.
pub(crate) struct Ring {
    buf: Box<[u8]>,
    append_head: usize,
    write_head: usize,
    used: usize,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            append_head: 0,
            write_head: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used
    }

    /// Copy `data` in at the append head, wrapping past the end if needed.
    ///
    /// The caller must have reserved the space.
    pub fn push(&mut self, data: &[u8]) {
        assert!(data.len() <= self.free(), "ring overflow");
        let capacity = self.capacity();
        let first = data.len().min(capacity - self.append_head);

        self.buf[self.append_head..self.append_head + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);

        self.append_head = (self.append_head + data.len()) % capacity;
        self.used += data.len();
    }

    /// The first `len` unconsumed bytes as two slices (the second is empty
    /// unless the range wraps)
    pub fn front(&self, len: usize) -> (&[u8], &[u8]) {
        assert!(len <= self.used, "front past used space");
        let first = len.min(self.capacity() - self.write_head);
        (
            &self.buf[self.write_head..self.write_head + first],
            &self.buf[..len - first],
        )
    }

    /// Copy unconsumed bytes starting `skip` bytes after the write head
    pub fn copy_out(&self, skip: usize, out: &mut [u8]) {
        assert!(skip + out.len() <= self.used, "copy past used space");
        let capacity = self.capacity();
        let start = (self.write_head + skip) % capacity;
        let first = out.len().min(capacity - start);

        let (head, tail) = out.split_at_mut(first);
        head.copy_from_slice(&self.buf[start..start + first]);
        tail.copy_from_slice(&self.buf[..tail.len()]);
    }

    /// Drop `len` bytes from the write head
    pub fn consume(&mut self, len: usize) {
        assert!(len <= self.used, "consume past used space");
        self.write_head = (self.write_head + len) % self.capacity();
        self.used -= len;
    }
}
