use std::sync::{Mutex, PoisonError};

use bulklink_transport::RawLink;
use bytes::BytesMut;
use tracing::trace;

use crate::codec::{pack_frame, Frame};
use crate::error::Result;
use crate::terminator::{BINARY, BINARY_ACK_SENT, OBJECT};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes complete frames to a link.
///
/// Sends take `&self`; concurrent senders are serialized so every frame goes
/// out as one contiguous link write.
pub struct FrameWriter<L> {
    link: L,
    buf: Mutex<BytesMut>,
}

impl<L: RawLink> FrameWriter<L> {
    /// Create a new frame writer.
    pub fn new(link: L) -> Self {
        Self {
            link,
            buf: Mutex::new(BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY)),
        }
    }

    /// Write a complete frame.
    pub fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.send(frame.channel, frame.payload.as_ref(), frame.terminator)
    }

    /// Encode and send a payload on a channel with the given terminator.
    pub fn send(&self, channel: u8, payload: &[u8], terminator: u8) -> Result<()> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.clear();
        pack_frame(channel, payload, terminator, &mut buf)?;
        trace!(channel, size = buf.len(), terminator, "frame write");
        self.link.write(&buf)?;
        Ok(())
    }

    /// Send an already-encoded object payload.
    pub fn send_object(&self, channel: u8, payload: &[u8]) -> Result<()> {
        self.send(channel, payload, OBJECT)
    }

    /// Send a binary block.
    pub fn send_binary(&self, channel: u8, payload: &[u8]) -> Result<()> {
        self.send(channel, payload, BINARY)
    }

    /// Acknowledge a received binary block on `channel`.
    pub fn send_binary_ack(&self, channel: u8) -> Result<()> {
        self.send(channel, &[], BINARY_ACK_SENT)
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &L {
        &self.link
    }

    /// Consume the writer and return the link.
    pub fn into_inner(self) -> L {
        self.link
    }
}
