/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the 16-bit size field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A nonzero size field too small to hold header and terminator.
    #[error("malformed frame header: size {size} is below the 4-byte minimum")]
    MalformedHeader { size: u16 },

    /// The underlying link failed.
    #[error("link error: {0}")]
    Transport(#[from] bulklink_transport::TransportError),
}

impl FrameError {
    /// Machine-readable classification of this error.
    pub fn symbol(&self) -> Vec<String> {
        match self {
            FrameError::Transport(err) => err.symbol(),
            other => vec!["PROTOCOL_ERROR".to_string(), other.to_string()],
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
