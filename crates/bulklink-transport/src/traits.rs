use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// A raw duplex byte link, e.g. a claimed USB bulk IN/OUT endpoint pair.
///
/// Reads and writes take `&self` because the two directions are independent
/// endpoints: one context reads while others write.
pub trait RawLink: Send + Sync {
    /// Write one block of bytes.
    ///
    /// Returns [`TransportError::Timeout`](crate::TransportError::Timeout) when
    /// the write could not complete in time; any other error is fatal.
    fn write(&self, buf: &[u8]) -> Result<()>;

    /// Perform a single read of at most `max_len` bytes, waiting up to `timeout`.
    ///
    /// Ordinary inactivity is not an error: an empty buffer is returned when
    /// nothing arrived before the timeout.
    fn read(&self, max_len: usize, timeout: Duration) -> Result<Bytes>;

    /// Link kind for diagnostics.
    fn link_name(&self) -> &'static str {
        "raw-link"
    }
}

impl<L: RawLink + ?Sized> RawLink for Arc<L> {
    fn write(&self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        (**self).read(max_len, timeout)
    }

    fn link_name(&self) -> &'static str {
        (**self).link_name()
    }
}

impl<L: RawLink + ?Sized> RawLink for Box<L> {
    fn write(&self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        (**self).read(max_len, timeout)
    }

    fn link_name(&self) -> &'static str {
        (**self).link_name()
    }
}
