use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bulklink_session::{DeviceEmulator, EmulatorConfig, EmulatorHandle, EmulatorStats};
use bulklink_transport::UnixDomainSocket;
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::EmulateArgs;
use crate::exit::{session_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{now_unix_seconds, print_report, OutputFormat, Report};

#[derive(Serialize)]
struct EmulateOutput {
    session_id: String,
    client: usize,
    #[serde(flatten)]
    stats: EmulatorStats,
    timestamp: String,
}

impl Report for EmulateOutput {
    fn rows(&self) -> Vec<(String, String)> {
        let s = &self.stats;
        vec![
            ("session".to_string(), self.session_id.clone()),
            ("client".to_string(), self.client.to_string()),
            ("handshakes".to_string(), s.handshakes.to_string()),
            ("channels_opened".to_string(), s.channels_opened.to_string()),
            ("channels_refused".to_string(), s.channels_refused.to_string()),
            ("channels_closed".to_string(), s.channels_closed.to_string()),
            ("objects_echoed".to_string(), s.objects_echoed.to_string()),
            ("binary_blocks".to_string(), s.binary_blocks.to_string()),
            ("binary_bytes".to_string(), s.binary_bytes.to_string()),
        ]
    }
}

/// Shutdown state shared with the signal handler.
struct Shutdown {
    running: AtomicBool,
    current: Mutex<Option<EmulatorHandle>>,
    path: PathBuf,
}

impl Shutdown {
    fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.stop();
        }
        // Unblock a pending accept.
        let _ = UnixDomainSocket::connect(&self.path);
    }

    fn set_current(&self, handle: Option<EmulatorHandle>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }
}

pub fn run(args: EmulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = EmulatorConfig {
        session_id: args.session_id.clone(),
        profile: parse_profile(&args.profile)?,
        refused_types: args.refuse.clone(),
        ..EmulatorConfig::default()
    };

    let socket =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    let shutdown = Arc::new(Shutdown {
        running: AtomicBool::new(true),
        current: Mutex::new(None),
        path: args.path.clone(),
    });
    install_ctrlc_handler(Arc::clone(&shutdown))?;

    let mut clients = 0usize;
    while shutdown.running.load(Ordering::SeqCst) {
        let link = match socket.accept() {
            Ok(link) => link,
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        if !shutdown.running.load(Ordering::SeqCst) {
            break;
        }
        clients += 1;
        info!(client = clients, "client attached");

        let emulator = DeviceEmulator::new(link, config.clone());
        shutdown.set_current(Some(emulator.handle()));
        let result = emulator.run();
        shutdown.set_current(None);

        match result {
            Ok(stats) => print_report(
                &EmulateOutput {
                    session_id: config.session_id.clone(),
                    client: clients,
                    stats,
                    timestamp: now_unix_seconds(),
                },
                format,
            ),
            Err(err) => {
                let err = session_error("emulated session failed", err);
                warn!(client = clients, error = %err, "client session ended with an error");
                if args.once {
                    return Err(err);
                }
            }
        }

        if args.once {
            break;
        }
    }

    Ok(SUCCESS)
}

fn parse_profile(entries: &[String]) -> CliResult<Vec<(String, String)>> {
    if entries.is_empty() {
        return Ok(EmulatorConfig::default().profile);
    }
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() && key != "session" => {
                Ok((key.to_string(), value.to_string()))
            }
            _ => Err(CliError::new(
                USAGE,
                format!("invalid --profile entry {entry:?}, expected key=value"),
            )),
        })
        .collect()
}

fn install_ctrlc_handler(shutdown: Arc<Shutdown>) -> CliResult<()> {
    ctrlc::set_handler(move || shutdown.trigger())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
