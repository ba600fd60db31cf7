use std::io::ErrorKind;
use std::path::PathBuf;

/// Symbol for recoverable timeouts.
pub const SYMBOL_TIMEOUT: &str = "TIMEOUT";
/// Symbol for fatal link failures; followed by a platform error code.
pub const SYMBOL_UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Errors that can occur on a raw link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A write did not complete within the link's write timeout.
    #[error("transport write timed out")]
    Timeout,

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote end of the link went away.
    #[error("link disconnected")]
    Disconnected,

    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// Classify a write-side I/O error: timeouts stay recoverable, the rest is fatal.
    pub fn from_write_error(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                TransportError::Disconnected
            }
            _ => TransportError::Io(err),
        }
    }

    /// Whether the error is a recoverable timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }

    /// Machine-readable classification of this error.
    ///
    /// Timeouts map to `("TIMEOUT",)`; everything else is
    /// `("UNKNOWN_ERROR", <code>)` where the code is the OS error number when
    /// one is available.
    pub fn symbol(&self) -> Vec<String> {
        match self {
            TransportError::Timeout => vec![SYMBOL_TIMEOUT.to_string()],
            TransportError::Io(err)
            | TransportError::Accept(err)
            | TransportError::Bind { source: err, .. }
            | TransportError::Connect { source: err, .. } => {
                vec![SYMBOL_UNKNOWN_ERROR.to_string(), error_code(err)]
            }
            TransportError::Disconnected => vec![
                SYMBOL_UNKNOWN_ERROR.to_string(),
                format!("{:?}", ErrorKind::NotConnected),
            ],
            TransportError::PathTooLong { .. } => vec![
                SYMBOL_UNKNOWN_ERROR.to_string(),
                format!("{:?}", ErrorKind::InvalidInput),
            ],
        }
    }
}

fn error_code(err: &std::io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => code.to_string(),
        None => format!("{:?}", err.kind()),
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
