//! Growable socket read buffer with a write cursor.
//!
//! The reactor reads directly into [`SocketBuffer::writable_tail`] and
//! commits with [`SocketBuffer::advance`]. Capacity grows in 4 KiB chunks
//! once the committed region passes 75% occupancy, up to the configured
//! maximum. A buffer that is full at its maximum exposes an empty tail;
//! the caller decides whether the request is complete or oversized.

pub const CHUNK_SIZE: usize = 4096;

pub struct SocketBuffer {
    data: Vec<u8>,
    pos: usize,
    max_size: usize,
}

impl SocketBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            data: vec![0; CHUNK_SIZE.min(max_size.max(1))],
            pos: 0,
            max_size,
        }
    }

    /// The uncommitted region the next `read()` lands in. Empty only when
    /// the buffer has hit its configured maximum.
    pub fn writable_tail(&mut self) -> &mut [u8] {
        &mut self.data[self.pos..]
    }

    /// Commit `n` freshly read bytes, growing ahead of the write cursor.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.data.len());
        self.pos += n;
        if self.pos * 4 > self.data.len() * 3 && self.data.len() < self.max_size {
            let new_len = (self.data.len() + CHUNK_SIZE).min(self.max_size);
            self.data.resize(new_len, 0);
        }
    }

    /// Committed prefix.
    pub fn view(&self) -> &[u8] {
        &self.data[..self.pos]
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_by_chunk_past_three_quarters() {
        let mut buf = SocketBuffer::new(64 * 1024);
        assert_eq!(buf.capacity(), CHUNK_SIZE);

        buf.advance(3000);
        assert_eq!(buf.capacity(), CHUNK_SIZE);

        // Crossing 75% of 4096 triggers one chunk of growth.
        buf.advance(100);
        assert_eq!(buf.capacity(), 2 * CHUNK_SIZE);
        assert_eq!(buf.len(), 3100);
        assert_eq!(buf.view().len(), 3100);
    }

    #[test]
    fn capped_at_max_with_empty_tail() {
        let max = 2 * CHUNK_SIZE;
        let mut buf = SocketBuffer::new(max);
        buf.advance(4000); // grow to max
        assert_eq!(buf.capacity(), max);

        buf.advance(buf.capacity() - 4000); // fill completely
        assert_eq!(buf.len(), max);
        assert!(buf.writable_tail().is_empty());
    }

    #[test]
    fn tail_is_writable_region() {
        let mut buf = SocketBuffer::new(CHUNK_SIZE);
        let tail = buf.writable_tail();
        tail[0] = b'G';
        tail[1] = b'E';
        buf.advance(2);
        assert_eq!(buf.view(), b"GE");
    }
}
