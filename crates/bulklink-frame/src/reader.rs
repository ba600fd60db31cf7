use std::time::Duration;

use bulklink_transport::RawLink;
use bytes::BytesMut;
use tracing::trace;

use crate::codec::{try_extract_frame, Extracted, FrameConfig};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Owns the receive buffer for one link.
///
/// Exactly one context should own a `FrameReader`: it performs all link
/// reads and all frame extraction. Bytes are only removed from the buffer as
/// whole frames or zero markers.
pub struct FrameReader<L> {
    link: L,
    buf: BytesMut,
    config: FrameConfig,
}

impl<L: RawLink> FrameReader<L> {
    /// Create a new frame reader with default configuration.
    pub fn new(link: L) -> Self {
        Self::with_config(link, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(link: L, config: FrameConfig) -> Self {
        Self {
            link,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Perform one bounded read and append whatever arrived.
    ///
    /// Returns the number of bytes added; zero means the read timed out.
    pub fn feed(&mut self, timeout: Duration) -> Result<usize> {
        let chunk = self.link.read(self.config.read_chunk_size, timeout)?;
        if !chunk.is_empty() {
            trace!(size = chunk.len(), buffered = self.buf.len(), "link read");
            self.buf.extend_from_slice(&chunk);
        }
        Ok(chunk.len())
    }

    /// Perform one read with the configured poll timeout.
    pub fn poll(&mut self) -> Result<usize> {
        let timeout = self.config.poll_timeout;
        self.feed(timeout)
    }

    /// Attempt to extract one frame from the buffer without reading.
    pub fn try_extract(&mut self) -> Result<Extracted> {
        try_extract_frame(&mut self.buf)
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &L {
        &self.link
    }

    /// Consume the reader and return the link. Buffered bytes are dropped.
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use bulklink_transport::{MemoryLink, TransportError};
    use bytes::Bytes;

    use super::*;
    use crate::codec::{pack_frame, Frame};
    use crate::error::FrameError;
    use crate::terminator::OBJECT;

    fn wire(frames: &[(u8, &[u8], u8)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (channel, payload, terminator) in frames {
            pack_frame(*channel, payload, *terminator, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_frame() {
        let (tx, rx) = MemoryLink::pair();
        tx.write(&wire(&[(1, b"hello", OBJECT)])).unwrap();

        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.feed(Duration::from_millis(100)).unwrap(), 9);
        assert_eq!(
            reader.try_extract().unwrap(),
            Extracted::Frame(Frame::new(1, &b"hello"[..], OBJECT))
        );
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn one_read_multiple_frames() {
        let (tx, rx) = MemoryLink::pair();
        tx.write(&wire(&[(1, b"one", OBJECT), (2, b"two", OBJECT)]))
            .unwrap();

        let mut reader = FrameReader::new(rx);
        reader.poll().unwrap();

        let first = reader.try_extract().unwrap();
        let second = reader.try_extract().unwrap();
        assert_eq!(first, Extracted::Frame(Frame::new(1, &b"one"[..], OBJECT)));
        assert_eq!(second, Extracted::Frame(Frame::new(2, &b"two"[..], OBJECT)));
        assert_eq!(reader.try_extract().unwrap(), Extracted::NeedMoreData);
    }

    #[test]
    fn frame_split_across_reads() {
        let (tx, rx) = MemoryLink::pair();
        let bytes = wire(&[(4, b"split payload", OBJECT)]);
        let config = FrameConfig {
            read_chunk_size: 5,
            ..FrameConfig::default()
        };
        tx.write(&bytes).unwrap();

        let mut reader = FrameReader::with_config(rx, config);
        let mut reads = 0;
        let frame = loop {
            reader.poll().unwrap();
            reads += 1;
            if let Extracted::Frame(frame) = reader.try_extract().unwrap() {
                break frame;
            }
        };

        assert_eq!(reads, 4);
        assert_eq!(frame.payload, Bytes::from_static(b"split payload"));
    }

    #[test]
    fn idle_feed_returns_zero() {
        let (_tx, rx) = MemoryLink::pair();
        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.feed(Duration::from_millis(10)).unwrap(), 0);
        assert_eq!(reader.try_extract().unwrap(), Extracted::NeedMoreData);
    }

    #[test]
    fn link_failure_propagates() {
        let (tx, rx) = MemoryLink::pair();
        drop(tx);

        let mut reader = FrameReader::new(rx);
        let err = reader.poll().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::Disconnected)
        ));
    }
}
