//! Device side of the protocol, for tests and local tooling.
//!
//! The emulator offers a session, confirms the client's acknowledge, answers
//! open/close requests, echoes every object back on its channel and
//! acknowledges binary blocks.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulklink_frame::{
    is_data_channel, Extracted, Frame, FrameConfig, FrameError, FrameReader, FrameWriter, BINARY,
    BINARY_ACK, BINARY_ACK_SENT, CONTROL_REQUEST, CONTROL_RESPONSE, HANDSHAKE_ACK,
    HANDSHAKE_CONFIRM, HANDSHAKE_OFFER, HANDSHAKE_PING, OBJECT,
};
use bulklink_transport::{RawLink, TransportError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::control::{ControlReply, ControlRequest, ACTION_CLOSE, ACTION_OPEN, STATUS_OK};
use crate::error::{Result, SessionError};
use crate::object::{self, as_text, map_get, Value};

/// Status sent when an open is refused.
pub const STATUS_REFUSED: &str = "failure";

/// Emulated device behavior.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Session id offered in the handshake.
    pub session_id: String,
    /// Extra fields sent next to the session id.
    pub profile: Vec<(String, String)>,
    /// Channel types whose open requests are refused.
    pub refused_types: Vec<String>,
    /// Read timeout for each loop iteration.
    pub poll_timeout: Duration,
    /// Maximum bytes requested per read.
    pub read_chunk_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            session_id: "emulated-0001".to_string(),
            profile: vec![
                ("model".to_string(), "bulklink-emulator".to_string()),
                ("firmware".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            ],
            refused_types: Vec::new(),
            poll_timeout: Duration::from_millis(50),
            read_chunk_size: 1024,
        }
    }
}

/// Traffic counters reported when the emulator stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmulatorStats {
    pub handshakes: u64,
    pub channels_opened: u64,
    pub channels_refused: u64,
    pub channels_closed: u64,
    pub objects_echoed: u64,
    pub binary_blocks: u64,
    pub binary_bytes: u64,
    pub acks_received: u64,
}

/// Stops a running emulator from another thread.
#[derive(Debug, Clone)]
pub struct EmulatorHandle {
    stop: Arc<AtomicBool>,
}

impl EmulatorHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Emulated device bound to one link.
pub struct DeviceEmulator<L> {
    reader: FrameReader<Arc<L>>,
    writer: FrameWriter<Arc<L>>,
    config: EmulatorConfig,
    stop: Arc<AtomicBool>,
    open: BTreeSet<u8>,
    established: bool,
    stats: EmulatorStats,
}

impl<L: RawLink> DeviceEmulator<L> {
    pub fn new(link: L, config: EmulatorConfig) -> Self {
        let link = Arc::new(link);
        let frame_config = FrameConfig {
            read_chunk_size: config.read_chunk_size,
            poll_timeout: config.poll_timeout,
        };
        Self {
            reader: FrameReader::with_config(Arc::clone(&link), frame_config),
            writer: FrameWriter::new(link),
            config,
            stop: Arc::new(AtomicBool::new(false)),
            open: BTreeSet::new(),
            established: false,
            stats: EmulatorStats::default(),
        }
    }

    pub fn handle(&self) -> EmulatorHandle {
        EmulatorHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Serve the link until stopped or the client disconnects.
    pub fn run(mut self) -> Result<EmulatorStats> {
        match self.serve() {
            Ok(()) => Ok(self.stats),
            Err(SessionError::Frame(FrameError::Transport(TransportError::Disconnected))) => {
                info!("client disconnected");
                Ok(self.stats)
            }
            Err(err) => Err(err),
        }
    }

    fn serve(&mut self) -> Result<()> {
        self.send_offer()?;

        while !self.stop.load(Ordering::SeqCst) {
            self.reader.poll()?;
            loop {
                match self.reader.try_extract()? {
                    Extracted::Frame(frame) => self.handle_frame(frame)?,
                    Extracted::ZeroMarker => debug!("zero marker from client"),
                    Extracted::NeedMoreData => break,
                }
            }
        }
        Ok(())
    }

    fn send_offer(&mut self) -> Result<()> {
        let mut entries = vec![(
            Value::from("session"),
            Value::from(self.config.session_id.as_str()),
        )];
        entries.extend(
            self.config
                .profile
                .iter()
                .map(|(key, value)| (Value::from(key.as_str()), Value::from(value.as_str()))),
        );
        debug!(session = %self.config.session_id, "offering session");
        self.writer
            .send_object(HANDSHAKE_OFFER, &object::encode(&Value::Map(entries))?)?;
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.channel {
            HANDSHAKE_ACK => self.on_handshake_ack(&frame),
            HANDSHAKE_PING => {
                debug!("ping from client, re-offering");
                self.established = false;
                self.send_offer()
            }
            CONTROL_REQUEST => self.on_control(&frame),
            channel if is_data_channel(channel) => self.on_data(frame),
            channel => {
                warn!(channel, "frame on unexpected channel ignored");
                Ok(())
            }
        }
    }

    fn on_handshake_ack(&mut self, frame: &Frame) -> Result<()> {
        let value = object::decode(&frame.payload)?;
        let session = map_get(&value, "session").and_then(as_text);
        if session != Some(self.config.session_id.as_str()) {
            warn!(received = ?session, "acknowledge for another session, re-offering");
            return self.send_offer();
        }

        let client = map_get(&value, "client").and_then(as_text).unwrap_or("?");
        info!(client, session = %self.config.session_id, "client connected");
        self.established = true;
        self.stats.handshakes += 1;
        let confirm = Value::Map(vec![(
            Value::from("session"),
            Value::from(self.config.session_id.as_str()),
        )]);
        self.writer
            .send_object(HANDSHAKE_CONFIRM, &object::encode(&confirm)?)?;
        Ok(())
    }

    fn on_control(&mut self, frame: &Frame) -> Result<()> {
        let value = object::decode(&frame.payload)?;
        let Some(request) = ControlRequest::from_value(&value) else {
            warn!("malformed control request ignored");
            return Ok(());
        };

        let status = match request.action.as_str() {
            ACTION_OPEN => {
                let channel_type = request.channel_type.as_deref().unwrap_or_default();
                if self.config.refused_types.iter().any(|t| t == channel_type) {
                    self.stats.channels_refused += 1;
                    debug!(channel = request.channel, channel_type, "refusing open");
                    STATUS_REFUSED
                } else {
                    self.open.insert(request.channel);
                    self.stats.channels_opened += 1;
                    debug!(channel = request.channel, channel_type, "channel opened");
                    STATUS_OK
                }
            }
            ACTION_CLOSE => {
                if self.open.remove(&request.channel) {
                    self.stats.channels_closed += 1;
                }
                debug!(channel = request.channel, "channel closed");
                STATUS_OK
            }
            other => {
                warn!(action = other, "unknown control action ignored");
                return Ok(());
            }
        };

        let reply = ControlReply {
            channel: request.channel,
            status,
            action: &request.action,
        };
        self.writer
            .send_object(CONTROL_RESPONSE, &object::encode(&reply)?)?;
        Ok(())
    }

    fn on_data(&mut self, frame: Frame) -> Result<()> {
        if !self.open.contains(&frame.channel) {
            warn!(channel = frame.channel, "traffic on closed channel ignored");
            return Ok(());
        }

        match frame.terminator {
            OBJECT => {
                self.writer.send_object(frame.channel, &frame.payload)?;
                self.stats.objects_echoed += 1;
            }
            BINARY => {
                self.stats.binary_blocks += 1;
                self.stats.binary_bytes += frame.payload.len() as u64;
                self.writer.send(frame.channel, &[], BINARY_ACK)?;
            }
            BINARY_ACK_SENT => self.stats.acks_received += 1,
            other => {
                return Err(SessionError::Protocol(format!(
                    "unknown terminator 0x{other:02X} from client"
                )))
            }
        }
        Ok(())
    }
}

impl<L> std::fmt::Debug for DeviceEmulator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEmulator")
            .field("session_id", &self.config.session_id)
            .field("established", &self.established)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bulklink_transport::MemoryLink;
    use serde_json::json;

    use super::*;
    use crate::testing::TestPeer;

    type Runner = thread::JoinHandle<Result<EmulatorStats>>;

    fn start(config: EmulatorConfig) -> (EmulatorHandle, Runner, TestPeer) {
        let (device_link, client_link) = MemoryLink::pair();
        let emulator = DeviceEmulator::new(device_link, config);
        let handle = emulator.handle();
        let runner = thread::spawn(move || emulator.run());
        (handle, runner, TestPeer::new(client_link))
    }

    #[test]
    fn offers_and_confirms() {
        let (handle, runner, mut client) = start(EmulatorConfig::default());

        let offer = client.expect_object(HANDSHAKE_OFFER);
        assert_eq!(
            map_get(&offer, "session").and_then(as_text),
            Some("emulated-0001")
        );
        assert_eq!(
            map_get(&offer, "model").and_then(as_text),
            Some("bulklink-emulator")
        );

        client.send_json(
            HANDSHAKE_ACK,
            json!({"session": "emulated-0001", "client": "test"}),
        );
        let confirm = client.expect_object(HANDSHAKE_CONFIRM);
        assert_eq!(
            map_get(&confirm, "session").and_then(as_text),
            Some("emulated-0001")
        );

        handle.stop();
        let stats = runner.join().unwrap().unwrap();
        assert_eq!(stats.handshakes, 1);
    }

    #[test]
    fn ping_triggers_new_offer() {
        let (handle, runner, mut client) = start(EmulatorConfig::default());
        client.expect_object(HANDSHAKE_OFFER);
        client.send_frame(HANDSHAKE_PING, &object::nil(), OBJECT);
        client.expect_object(HANDSHAKE_OFFER);
        handle.stop();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn refuses_configured_types() {
        let config = EmulatorConfig {
            refused_types: vec!["camera".to_string()],
            ..EmulatorConfig::default()
        };
        let (handle, runner, mut client) = start(config);
        client.expect_object(HANDSHAKE_OFFER);

        client.send_json(
            CONTROL_REQUEST,
            json!({"channel": 0, "action": "open", "type": "camera"}),
        );
        let reply = client.expect_object(CONTROL_RESPONSE);
        assert_eq!(map_get(&reply, "status").and_then(as_text), Some("failure"));
        assert_eq!(map_get(&reply, "action").and_then(as_text), Some("open"));

        handle.stop();
        let stats = runner.join().unwrap().unwrap();
        assert_eq!(stats.channels_refused, 1);
        assert_eq!(stats.channels_opened, 0);
    }

    #[test]
    fn acknowledges_binary_with_receive_ack() {
        let (handle, runner, mut client) = start(EmulatorConfig::default());
        client.expect_object(HANDSHAKE_OFFER);
        client.send_json(
            CONTROL_REQUEST,
            json!({"channel": 5, "action": "open", "type": "firmware"}),
        );
        client.expect_object(CONTROL_RESPONSE);

        client.send_binary(5, &[0xAA; 100]);
        let ack = client.expect_frame(5);
        assert_eq!(ack.terminator, BINARY_ACK);
        assert!(ack.payload.is_empty());

        handle.stop();
        let stats = runner.join().unwrap().unwrap();
        assert_eq!(stats.binary_blocks, 1);
        assert_eq!(stats.binary_bytes, 100);
    }

    #[test]
    fn client_disconnect_ends_run() {
        let (_handle, runner, client) = start(EmulatorConfig::default());
        drop(client);
        let stats = runner.join().unwrap().unwrap();
        assert_eq!(stats, EmulatorStats::default());
    }
}
