use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use bulklink_session::{connect, Dispatcher, Session, SessionConfig};
use bulklink_transport::{StreamLink, TransportError, UnixDomainSocket};
use clap::{Args, Subcommand};
use tracing::debug;

use crate::exit::{session_error, transport_error, CliError, CliResult, TIMEOUT, USAGE};
use crate::output::OutputFormat;

pub mod emulate;
pub mod probe;
pub mod send;
pub mod upload;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Handshake with a device and print its session and profile.
    Probe(ProbeArgs),
    /// Open a channel and send one object.
    Send(SendArgs),
    /// Send a file as acknowledged binary blocks.
    Upload(UploadArgs),
    /// Serve an emulated device on a Unix socket.
    Emulate(EmulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Probe(args) => probe::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Upload(args) => upload::run(args, format),
        Command::Emulate(args) => emulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that talks to a device.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Socket path of the device bridge (or `bulklink emulate`).
    pub path: PathBuf,
    /// How long to keep retrying the socket connection (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Handshake rounds before giving up.
    #[arg(long, default_value_t = 5)]
    pub handshake_retries: u32,
    /// Identity sent to the device during the handshake.
    #[arg(long, env = "BULKLINK_CLIENT_ID")]
    pub client_id: Option<String>,
}

impl LinkArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        if self.handshake_retries == 0 {
            return Err(CliError::new(USAGE, "--handshake-retries must be at least 1"));
        }
        let mut config = SessionConfig {
            handshake_retries: self.handshake_retries,
            ..SessionConfig::default()
        };
        if let Some(client_id) = &self.client_id {
            config.client_identity = client_id.clone();
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Channel type to open.
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub channel_type: String,
    /// JSON object to send.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub json: Option<String>,
    /// Read the JSON object from a file.
    #[arg(long, conflicts_with = "json")]
    pub file: Option<PathBuf>,
    /// Wait for one reply object and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "3s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// File to upload.
    #[arg(long)]
    pub file: PathBuf,
    /// Channel type to open.
    #[arg(long = "type", short = 't', value_name = "TYPE", default_value = "binary")]
    pub channel_type: String,
    /// Bytes per binary block.
    #[arg(long, default_value_t = 4096)]
    pub chunk: usize,
    /// Maximum time to wait for each block's acknowledge (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub ack_timeout: String,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Session id to offer.
    #[arg(long, default_value = "emulated-0001")]
    pub session_id: String,
    /// Channel types to refuse (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub refuse: Vec<String>,
    /// Extra profile entries offered with the session (key=value, comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub profile: Vec<String>,
    /// Exit after the first client disconnects.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Connect to the socket (retrying while it is missing or refusing), run the
/// handshake and start the receive loop.
pub fn open_session(link: &LinkArgs) -> CliResult<Session> {
    let timeout = parse_duration(&link.timeout)?;
    let config = link.session_config()?;
    let stream = connect_with_timeout(&link.path, timeout)?;
    let (session, dispatcher) =
        connect(stream, config).map_err(|err| session_error("handshake failed", err))?;
    spawn_dispatcher(dispatcher)?;
    Ok(session)
}

fn spawn_dispatcher(dispatcher: Dispatcher) -> CliResult<()> {
    // The loop thread is detached; `Session::stop` ends it.
    dispatcher
        .spawn()
        .map(drop)
        .map_err(|err| session_error("receive loop failed to start", err))
}

fn connect_with_timeout(path: &Path, timeout: Duration) -> CliResult<StreamLink> {
    let start = Instant::now();
    loop {
        match UnixDomainSocket::connect(path) {
            Ok(link) => return Ok(link),
            Err(err) => {
                if !is_retryable_connect_error(&err) {
                    return Err(transport_error("connect failed", err));
                }
                if start.elapsed() >= timeout {
                    return Err(CliError::new(
                        TIMEOUT,
                        format!("connect timed out after {timeout:?}"),
                    ));
                }
                debug!(path = %path.display(), "socket not ready, retrying");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

fn is_retryable_connect_error(err: &TransportError) -> bool {
    match err {
        TransportError::Connect { source, .. } => matches!(
            source.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
        ),
        _ => false,
    }
}
