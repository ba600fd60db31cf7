use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::RawLink;

/// Smallest read timeout handed to the socket; a zero timeout is rejected by the OS.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Default write timeout for socket links.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// A [`RawLink`] over a connected Unix stream socket.
///
/// Used to reach a device through a bridge process that owns the USB
/// endpoints, or to talk to the device emulator.
pub struct StreamLink {
    stream: UnixStream,
}

impl StreamLink {
    /// Wrap a connected stream, applying the default write timeout.
    pub fn new(stream: UnixStream) -> Result<Self> {
        Self::with_write_timeout(stream, DEFAULT_WRITE_TIMEOUT)
    }

    /// Wrap a connected stream with an explicit write timeout.
    pub fn with_write_timeout(stream: UnixStream, write_timeout: Duration) -> Result<Self> {
        stream.set_write_timeout(Some(write_timeout.max(MIN_READ_TIMEOUT)))?;
        Ok(Self { stream })
    }

    /// Borrow the underlying socket.
    pub fn get_ref(&self) -> &UnixStream {
        &self.stream
    }
}

impl RawLink for StreamLink {
    fn write(&self, buf: &[u8]) -> Result<()> {
        let mut stream = &self.stream;
        let mut offset = 0usize;
        while offset < buf.len() {
            match stream.write(&buf[offset..]) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::from_write_error(err)),
            }
        }
        Ok(())
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Bytes> {
        self.stream
            .set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;

        let mut stream = &self.stream;
        let mut chunk = vec![0u8; max_len];
        match stream.read(&mut chunk) {
            Ok(0) if max_len > 0 => Err(TransportError::Disconnected),
            Ok(n) => {
                chunk.truncate(n);
                Ok(Bytes::from(chunk))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(Bytes::new())
            }
            Err(err) if err.kind() == ErrorKind::ConnectionReset => {
                Err(TransportError::Disconnected)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn link_name(&self) -> &'static str {
        "unix-stream"
    }
}

impl std::fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLink").field("type", &"unix").finish()
    }
}

/// Unix domain socket listener for bridges and emulators.
///
/// The socket file is removed again when the listener is dropped.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path`, replacing a stale socket file if present.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening on unix domain socket");
        Ok(Self { listener, path })
    }

    /// Accept the next connection as a link (blocking).
    pub fn accept(&self) -> Result<StreamLink> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted link connection");
        StreamLink::new(stream)
    }

    /// Connect to a listening socket and return it as a link.
    pub fn connect(path: impl AsRef<Path>) -> Result<StreamLink> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        StreamLink::new(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
