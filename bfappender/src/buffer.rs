use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// An ordered byte sequence of appended records not yet handed to the OS.
///
/// Guarded by its own lock, independent of the file lock, so that `append`
/// never blocks behind file I/O (see `SPEC_FULL.md` §4.3). Only the write
/// driver calls `shrink`/`take`, and it always does so while holding the file
/// lock, so the prefix being consumed by a drain pass can never be mutated
/// concurrently by another drain pass.
#[derive(Debug, Default)]
pub(crate) struct RecordBuffer {
    inner: Mutex<BytesMut>,
}

impl RecordBuffer {
    pub fn new() -> Self {
        RecordBuffer {
            inner: Mutex::new(BytesMut::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn append(&self, record: &[u8]) {
        self.inner.lock().extend_from_slice(record);
    }

    /// Returns a snapshot of the currently buffered bytes without consuming
    /// them. Cheap: `Bytes` is reference-counted, so this doesn't copy.
    pub fn peek(&self) -> Bytes {
        self.inner.lock().clone().freeze()
    }

    /// Drops the first `n` bytes of the buffer.
    pub fn shrink(&self, n: usize) {
        let mut buf = self.inner.lock();
        let n = n.min(buf.len());
        let _ = buf.split_to(n);
    }

    /// Removes and returns up to `n` bytes from the front of the buffer. `n
    /// == usize::MAX` takes everything.
    pub fn take(&self, n: usize) -> Bytes {
        let mut buf = self.inner.lock();
        let n = n.min(buf.len());
        buf.split_to(n).freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_peek_do_not_consume() {
        let buf = RecordBuffer::new();
        buf.append(b"hello");
        buf.append(b" world");
        assert_eq!(buf.peek().as_ref(), b"hello world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.peek().as_ref(), b"hello world");
    }

    #[test]
    fn shrink_drops_a_prefix() {
        let buf = RecordBuffer::new();
        buf.append(b"0123456789");
        buf.shrink(4);
        assert_eq!(buf.peek().as_ref(), b"456789");
    }

    #[test]
    fn take_consumes_and_returns() {
        let buf = RecordBuffer::new();
        buf.append(b"abcdef");
        let taken = buf.take(3);
        assert_eq!(taken.as_ref(), b"abc");
        assert_eq!(buf.peek().as_ref(), b"def");
    }

    #[test]
    fn take_more_than_available_drains_everything() {
        let buf = RecordBuffer::new();
        buf.append(b"abc");
        let taken = buf.take(usize::MAX);
        assert_eq!(taken.as_ref(), b"abc");
        assert_eq!(buf.len(), 0);
    }
}
