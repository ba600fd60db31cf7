use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: total size (2) + channel id (1) = 3 bytes.
pub const HEADER_SIZE: usize = 3;

/// Smallest valid frame: header plus terminator, empty payload.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 1;

/// Bytes consumed by a zero-size marker (the size field only).
pub const ZERO_MARKER_SIZE: usize = 2;

/// Largest payload the 16-bit size field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - MIN_FRAME_SIZE;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this frame belongs to.
    pub channel: u8,
    /// The frame payload.
    pub payload: Bytes,
    /// The trailing payload-kind byte.
    pub terminator: u8,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u8, payload: impl Into<Bytes>, terminator: u8) -> Self {
        Self {
            channel,
            payload: payload.into(),
            terminator,
        }
    }

    /// The total wire size of this frame (header + payload + terminator).
    pub fn wire_size(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }
}

/// Result of one extraction attempt against the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// A complete frame was removed from the front of the buffer.
    Frame(Frame),
    /// The size field read as zero; exactly two bytes were consumed.
    ZeroMarker,
    /// Not enough bytes buffered; the buffer is unchanged.
    NeedMoreData,
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬─────────────────┬────────────┐
/// │ Total size   │ Channel  │ Payload         │ Terminator │
/// │ (2B LE)      │ (1B)     │ (size - 4 B)    │ (1B)       │
/// └──────────────┴──────────┴─────────────────┴────────────┘
/// ```
pub fn pack_frame(channel: u8, payload: &[u8], terminator: u8, dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let total = payload.len() + MIN_FRAME_SIZE;
    dst.reserve(total);
    dst.put_u16_le(total as u16);
    dst.put_u8(channel);
    dst.put_slice(payload);
    dst.put_u8(terminator);
    Ok(())
}

/// Try to take one frame off the front of `src`.
///
/// At least four bytes must be buffered before the header is inspected. A zero
/// size field consumes only the two size bytes; the byte after it is read
/// again as the first byte of the next header. Call repeatedly until
/// [`Extracted::NeedMoreData`]: one link read may carry several frames.
pub fn try_extract_frame(src: &mut BytesMut) -> Result<Extracted> {
    if src.len() < MIN_FRAME_SIZE {
        return Ok(Extracted::NeedMoreData);
    }

    let size = u16::from_le_bytes([src[0], src[1]]);
    if size == 0 {
        src.advance(ZERO_MARKER_SIZE);
        return Ok(Extracted::ZeroMarker);
    }
    if (size as usize) < MIN_FRAME_SIZE {
        return Err(FrameError::MalformedHeader { size });
    }

    let total = size as usize;
    if src.len() < total {
        return Ok(Extracted::NeedMoreData);
    }

    let channel = src[2];
    let terminator = src[total - 1];
    src.advance(HEADER_SIZE);
    let payload = src.split_to(total - MIN_FRAME_SIZE).freeze();
    src.advance(1);

    Ok(Extracted::Frame(Frame {
        channel,
        payload,
        terminator,
    }))
}

/// Configuration for frame reading.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum bytes requested from the link per read. Default: 1024.
    pub read_chunk_size: usize,
    /// Read timeout used when none is given explicitly. Default: 50 ms.
    pub poll_timeout: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            poll_timeout: Duration::from_millis(50),
        }
    }
}
