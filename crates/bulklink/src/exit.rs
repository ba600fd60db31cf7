use std::fmt;
use std::io;

use bulklink_frame::FrameError;
use bulklink_session::SessionError;
use bulklink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source) => io_error(context, source),
        TransportError::Timeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::MalformedHeader { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

/// Map a session error to an exit code. The message carries the error's
/// symbol so scripts can tell failures apart without parsing prose.
pub fn session_error(context: &str, err: SessionError) -> CliError {
    let err = match err {
        SessionError::Transport(inner) => return transport_error(context, inner),
        SessionError::Frame(inner) => return frame_error(context, inner),
        other => other,
    };

    let code = match &err {
        SessionError::Protocol(_) => TRANSPORT_ERROR,
        SessionError::Timeout(_) => TIMEOUT,
        SessionError::Encode(_) | SessionError::Decode(_) => DATA_INVALID,
        _ => FAILURE,
    };
    let symbol = err.symbol().join(":");
    CliError::new(code, format!("{context}: {err} [{symbol}]"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn session_errors_map_to_exit_codes() {
        let err = session_error("probe", SessionError::HandshakeFailed("x".to_string()));
        assert_eq!(err.code, FAILURE);
        assert!(err.message.contains("[HANDSHAKE_FAILED]"));

        let err = session_error("send", SessionError::Timeout(Duration::from_secs(3)));
        assert_eq!(err.code, TIMEOUT);

        let err = session_error(
            "open",
            SessionError::ChannelOpenFailed {
                index: 0,
                status: "failure".to_string(),
            },
        );
        assert!(err.message.contains("[CHANNEL_OPEN_FAILED:failure]"));
    }

    #[test]
    fn nested_transport_errors_keep_their_code() {
        let err = session_error(
            "upload",
            SessionError::Frame(FrameError::Transport(TransportError::Disconnected)),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);

        let err = session_error("upload", SessionError::Transport(TransportError::Timeout));
        assert_eq!(err.code, TIMEOUT);
    }
}
