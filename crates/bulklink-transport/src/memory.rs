use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::RawLink;

/// One end of an in-process link pair.
///
/// Each `write` is delivered to the other end as one transfer; a read returns
/// at most `max_len` bytes and keeps the remainder for the next read, like a
/// bulk endpoint with a short receive buffer.
pub struct MemoryLink {
    tx: Sender<Vec<u8>>,
    rx: Mutex<Inbound>,
}

struct Inbound {
    rx: Receiver<Vec<u8>>,
    pending: BytesMut,
}

impl MemoryLink {
    /// Create two connected ends.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let (left_tx, right_rx) = mpsc::channel();
        let (right_tx, left_rx) = mpsc::channel();
        (MemoryLink::new(left_tx, left_rx), MemoryLink::new(right_tx, right_rx))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx: Mutex::new(Inbound {
                rx,
                pending: BytesMut::new(),
            }),
        }
    }
}

impl RawLink for MemoryLink {
    fn write(&self, buf: &[u8]) -> Result<()> {
        trace!(size = buf.len(), "memory link write");
        self.tx
            .send(buf.to_vec())
            .map_err(|_| TransportError::Disconnected)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        let mut inbound = self.rx.lock().unwrap_or_else(PoisonError::into_inner);

        if inbound.pending.is_empty() {
            match inbound.rx.recv_timeout(timeout) {
                Ok(chunk) => inbound.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(Bytes::new()),
                Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
            }
        }

        let take = inbound.pending.len().min(max_len);
        Ok(inbound.pending.split_to(take).freeze())
    }

    fn link_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn write_arrives_on_other_end() {
        let (left, right) = MemoryLink::pair();
        left.write(b"hello").unwrap();

        let got = right.read(64, Duration::from_millis(100)).unwrap();
        assert_eq!(got.as_ref(), b"hello");
    }

    #[test]
    fn read_honours_max_len() {
        let (left, right) = MemoryLink::pair();
        left.write(b"abcdef").unwrap();

        let first = right.read(4, Duration::from_millis(100)).unwrap();
        let second = right.read(4, Duration::from_millis(100)).unwrap();
        assert_eq!(first.as_ref(), b"abcd");
        assert_eq!(second.as_ref(), b"ef");
    }

    #[test]
    fn idle_read_returns_empty_after_timeout() {
        let (_left, right) = MemoryLink::pair();
        let start = Instant::now();
        let got = right.read(64, Duration::from_millis(20)).unwrap();
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn dropped_peer_is_disconnected() {
        let (left, right) = MemoryLink::pair();
        drop(left);

        let err = right.read(64, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
        let err = right.write(b"x").unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
    }

    #[test]
    fn transfers_keep_order() {
        let (left, right) = MemoryLink::pair();
        left.write(b"one").unwrap();
        left.write(b"two").unwrap();

        assert_eq!(right.read(64, Duration::from_millis(50)).unwrap().as_ref(), b"one");
        assert_eq!(right.read(64, Duration::from_millis(50)).unwrap().as_ref(), b"two");
    }
}
