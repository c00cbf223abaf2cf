//! Outbound buffers of one socket

use std::{
    collections::VecDeque,
    io::{self, ErrorKind, Write},
};

use bytes::{Buf, Bytes};

/// Result of `WriteQueue::flush`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushStatus {
    /// Everything has been written
    Drained,
    /// Socket would block, the rest stays queued
    Pending,
}

/// FIFO of buffers waiting for a writable socket
///
/// A partially written buffer stays at the head until its remaining bytes are written.
#[derive(Debug, Default)]
pub struct WriteQueue {
    buffers: VecDeque<Bytes>,
}

impl WriteQueue {
    pub fn new() -> WriteQueue {
        WriteQueue::default()
    }

    pub fn push(&mut self, buf: Bytes) {
        if !buf.is_empty() {
            self.buffers.push_back(buf);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Total bytes still queued
    pub fn pending_bytes(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    /// Writes as much as `w` accepts without blocking
    pub fn flush<W: Write>(&mut self, w: &mut W) -> io::Result<FlushStatus> {
        while let Some(head) = self.buffers.front_mut() {
            match w.write(head) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    head.advance(n);
                    if head.is_empty() {
                        self.buffers.pop_front();
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return Ok(FlushStatus::Pending),
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(FlushStatus::Drained)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Accepts at most `chunk` bytes per call and `budget` bytes until it would block
    struct ThrottledWriter {
        written: Vec<u8>,
        chunk: usize,
        budget: usize,
    }

    impl Write for ThrottledWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk).min(self.budget);
            self.written.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_writes_keep_order() {
        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"hello "));
        queue.push(Bytes::from_static(b""));
        queue.push(Bytes::from_static(b"shadowsocks "));
        queue.push(Bytes::from_static(b"world"));
        assert_eq!(queue.len(), 3);

        let mut w = ThrottledWriter {
            written: Vec::new(),
            chunk: 4,
            budget: 9,
        };

        assert_eq!(queue.flush(&mut w).unwrap(), FlushStatus::Pending);
        assert_eq!(&w.written[..], b"hello sha");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_bytes(), 14);

        w.budget = usize::MAX;
        assert_eq!(queue.flush(&mut w).unwrap(), FlushStatus::Drained);
        assert_eq!(&w.written[..], b"hello shadowsocks world");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_write_zero() {
        struct ZeroWriter;
        impl Write for ZeroWriter {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut queue = WriteQueue::new();
        queue.push(Bytes::from_static(b"data"));
        let err = queue.flush(&mut ZeroWriter).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
    }

    #[test]
    fn test_empty_queue_is_drained() {
        let mut queue = WriteQueue::new();
        let mut out = Vec::new();
        assert_eq!(queue.flush(&mut out).unwrap(), FlushStatus::Drained);
    }
}
