use std::time::Duration;

use bulklink_frame::FrameConfig;

/// Default timeout for channel operations (`get_object`, `send_binary`).
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(3);

/// Session behavior configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake rounds that may time out before the handshake fails.
    pub handshake_retries: u32,
    /// Read timeout for each handshake round.
    pub handshake_poll_timeout: Duration,
    /// Read timeout for each receive loop iteration.
    pub poll_timeout: Duration,
    /// Maximum bytes requested from the link per read.
    pub read_chunk_size: usize,
    /// How long `open_channel` waits for the device's response.
    pub open_timeout: Duration,
    /// Identity string sent to the device in the handshake acknowledge.
    pub client_identity: String,
}

impl SessionConfig {
    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            read_chunk_size: self.read_chunk_size,
            poll_timeout: self.poll_timeout,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_retries: 5,
            handshake_poll_timeout: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(50),
            read_chunk_size: 1024,
            open_timeout: DEFAULT_CHANNEL_TIMEOUT,
            client_identity: format!("bulklink-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
