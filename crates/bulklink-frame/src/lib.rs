//! Frame codec for bulklink.
//!
//! Every message on the link is framed as:
//! - a 2-byte little-endian total size (header + payload + terminator)
//! - a 1-byte channel id
//! - the payload
//! - a 1-byte terminator describing the payload kind
//!
//! A total size of zero is a keep-alive/resync marker, not a frame.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod terminator;
pub mod writer;

pub use channel::{
    channel_name, is_data_channel, CONTROL_REQUEST, CONTROL_RESPONSE, DATA_CHANNEL_LIMIT,
    HANDSHAKE_ACK, HANDSHAKE_CONFIRM, HANDSHAKE_OFFER, HANDSHAKE_PING,
};
pub use codec::{
    pack_frame, try_extract_frame, Extracted, Frame, FrameConfig, HEADER_SIZE, MAX_PAYLOAD,
    MIN_FRAME_SIZE, ZERO_MARKER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use terminator::{terminator_name, BINARY, BINARY_ACK, BINARY_ACK_SENT, OBJECT};
pub use writer::FrameWriter;
