use std::time::Duration;

use bulklink_frame::FrameError;
use bulklink_transport::TransportError;

/// Errors that can occur in session and channel operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Link-level failure (timeout or fatal I/O).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level failure.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The peer violated the wire protocol. Fatal to the session.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The handshake retry budget ran out.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A blocking operation gave up after its timeout. Local to the caller.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The receive loop has stopped; no further traffic is possible.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// The device refused to open a channel.
    #[error("channel {index} open failed with status {status:?}")]
    ChannelOpenFailed { index: u8, status: String },

    /// Every data channel index is in use.
    #[error("no free channel index")]
    ChannelsExhausted,

    /// The channel has been closed locally.
    #[error("channel {0} is closed")]
    ChannelClosed(u8),

    /// Object encoding failed.
    #[error("object encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Object payload could not be decoded.
    #[error("object decode error: {0}")]
    Decode(String),
}

impl SessionError {
    /// Machine-readable classification of this error.
    pub fn symbol(&self) -> Vec<String> {
        match self {
            SessionError::Transport(err) => err.symbol(),
            SessionError::Frame(err) => err.symbol(),
            SessionError::Protocol(description) => {
                vec!["PROTOCOL_ERROR".to_string(), description.clone()]
            }
            SessionError::HandshakeFailed(_) => vec!["HANDSHAKE_FAILED".to_string()],
            SessionError::Timeout(_) => vec!["TIMEOUT".to_string()],
            SessionError::SessionClosed(_) => vec!["SESSION_CLOSED".to_string()],
            SessionError::ChannelOpenFailed { status, .. } => {
                vec!["CHANNEL_OPEN_FAILED".to_string(), status.clone()]
            }
            SessionError::ChannelsExhausted => vec!["RESOURCE_BUSY".to_string()],
            SessionError::ChannelClosed(_) => vec!["CHANNEL_CLOSED".to_string()],
            SessionError::Encode(_) | SessionError::Decode(_) => {
                vec!["BAD_OBJECT".to_string()]
            }
        }
    }

    /// Whether the error only affects the operation that returned it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout(_)
                | SessionError::Transport(TransportError::Timeout)
                | SessionError::ChannelOpenFailed { .. }
                | SessionError::ChannelsExhausted
                | SessionError::ChannelClosed(_)
                | SessionError::Encode(_)
        )
    }
}

impl From<rmpv::decode::Error> for SessionError {
    fn from(err: rmpv::decode::Error) -> Self {
        SessionError::Decode(err.to_string())
    }
}

impl From<rmpv::ext::Error> for SessionError {
    fn from(err: rmpv::ext::Error) -> Self {
        SessionError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
