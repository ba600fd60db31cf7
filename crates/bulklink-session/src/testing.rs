//! Scripted device side used by the unit tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bulklink_frame::{
    Extracted, Frame, FrameReader, FrameWriter, BINARY, HANDSHAKE_PING, OBJECT,
};
use bulklink_transport::{MemoryLink, RawLink};

use crate::config::SessionConfig;
use crate::object::{self, Value};

const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        handshake_poll_timeout: Duration::from_millis(100),
        poll_timeout: Duration::from_millis(10),
        open_timeout: Duration::from_secs(1),
        ..SessionConfig::default()
    }
}

pub(crate) struct TestPeer {
    link: Arc<MemoryLink>,
    reader: FrameReader<Arc<MemoryLink>>,
    writer: FrameWriter<Arc<MemoryLink>>,
}

impl TestPeer {
    pub(crate) fn new(link: MemoryLink) -> Self {
        let link = Arc::new(link);
        Self {
            reader: FrameReader::new(Arc::clone(&link)),
            writer: FrameWriter::new(Arc::clone(&link)),
            link,
        }
    }

    pub(crate) fn send_json(&self, channel: u8, value: serde_json::Value) {
        let payload = object::encode(&value).expect("json should encode");
        self.writer
            .send(channel, &payload, OBJECT)
            .expect("peer write should succeed");
    }

    pub(crate) fn send_binary(&self, channel: u8, data: &[u8]) {
        self.writer
            .send(channel, data, BINARY)
            .expect("peer write should succeed");
    }

    pub(crate) fn send_frame(&self, channel: u8, payload: &[u8], terminator: u8) {
        self.writer
            .send(channel, payload, terminator)
            .expect("peer write should succeed");
    }

    pub(crate) fn send_raw(&self, bytes: &[u8]) {
        self.link.write(bytes).expect("peer write should succeed");
    }

    /// Next frame from the client, or `None` once `timeout` passes.
    pub(crate) fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.reader.try_extract().expect("client frames should parse") {
                Extracted::Frame(frame) => return Some(frame),
                Extracted::ZeroMarker => continue,
                Extracted::NeedMoreData => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            match self.reader.feed(deadline - now) {
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }

    /// Wait for a frame on `channel`, skipping handshake pings unless those
    /// are what the caller wants.
    pub(crate) fn expect_frame(&mut self, channel: u8) -> Frame {
        loop {
            let frame = self
                .next_frame(EXPECT_TIMEOUT)
                .unwrap_or_else(|| panic!("expected a frame on 0x{channel:02X}"));
            if frame.channel == channel {
                return frame;
            }
            assert_eq!(
                frame.channel, HANDSHAKE_PING,
                "unexpected frame while waiting for 0x{channel:02X}"
            );
        }
    }

    pub(crate) fn expect_object(&mut self, channel: u8) -> Value {
        let frame = self.expect_frame(channel);
        assert_eq!(frame.terminator, OBJECT);
        object::decode(&frame.payload).expect("object payload should decode")
    }

    /// Everything the client has sent so far.
    pub(crate) fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(Duration::from_millis(50)) {
            frames.push(frame);
        }
        frames
    }
}
