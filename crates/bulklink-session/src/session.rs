use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bulklink_frame::{
    channel_name, is_data_channel, terminator_name, Extracted, Frame, FrameReader, FrameWriter,
    BINARY, BINARY_ACK, CONTROL_REQUEST, CONTROL_RESPONSE, DATA_CHANNEL_LIMIT, OBJECT,
};
use bulklink_transport::{RawLink, TransportError};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Channel, ChannelState};
use crate::config::SessionConfig;
use crate::control::{ControlAction, ControlRequest, ControlResponse};
use crate::error::{Result, SessionError};
use crate::handshake::{perform_handshake, EndpointProfile, HandshakeResult, SessionId};
use crate::object;

type SharedLink = Arc<dyn RawLink>;

/// Type recorded for channels the device opened without a live request.
const ORPHAN_CHANNEL_TYPE: &str = "?";

enum OpenOutcome {
    Opened(Arc<ChannelState>),
    Refused(String),
}

struct PendingOpen {
    index: u8,
    channel_type: String,
    reply: SyncSender<OpenOutcome>,
}

#[derive(Default)]
struct ChannelTable {
    channels: HashMap<u8, Arc<ChannelState>>,
    pending_open: Option<PendingOpen>,
    closed: Option<String>,
}

impl ChannelTable {
    fn lowest_free_index(&self) -> Option<u8> {
        (0..DATA_CHANNEL_LIMIT).find(|index| !self.channels.contains_key(index))
    }
}

/// State shared by the session handle, channel handles and the receive loop.
pub(crate) struct Shared {
    pub(crate) writer: FrameWriter<SharedLink>,
    config: SessionConfig,
    handshake: HandshakeResult,
    running: AtomicBool,
    table: Mutex<ChannelTable>,
    open_lock: Mutex<()>,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, ChannelTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn request_close(&self, index: u8) -> Result<()> {
        debug!(channel = index, "requesting channel close");
        let payload = object::encode(&ControlRequest::close(index))?;
        self.writer.send_object(CONTROL_REQUEST, &payload)?;
        Ok(())
    }

    /// Stop the session and wake every waiter. Only the first call has an
    /// effect.
    fn shutdown(&self, reason: &str) {
        self.running.store(false, Ordering::SeqCst);
        let channels: Vec<_> = {
            let mut table = self.table();
            if table.closed.is_some() {
                return;
            }
            table.closed = Some(reason.to_string());
            // Dropping the reply sender wakes a blocked open.
            table.pending_open = None;
            table.channels.values().cloned().collect()
        };
        for state in channels {
            state.mark_session_closed(reason);
        }
        info!(reason, "session closed");
    }

    fn closed_reason(&self) -> String {
        self.table()
            .closed
            .clone()
            .unwrap_or_else(|| "session stopped".to_string())
    }
}

/// Shuts the session down once the last [`Session`] or [`Channel`] handle is
/// gone.
pub(crate) struct SessionGuard {
    pub(crate) shared: Arc<Shared>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.shared.is_running() {
            debug!("last session handle dropped");
        }
        self.shared.shutdown("session handles dropped");
    }
}

/// Handshake the link and build the session.
///
/// Returns the cloneable [`Session`] handle and the [`Dispatcher`] that must
/// be run (usually via [`Dispatcher::spawn`]) for any channel traffic to flow.
/// The dispatcher exits cleanly once every `Session` and [`Channel`] handle
/// has been dropped.
pub fn connect<L>(link: L, config: SessionConfig) -> Result<(Session, Dispatcher)>
where
    L: RawLink + 'static,
{
    let link: SharedLink = Arc::new(link);
    debug!(link = link.link_name(), "starting handshake");

    let mut reader = FrameReader::with_config(Arc::clone(&link), config.frame_config());
    let writer = FrameWriter::new(link);
    let handshake = perform_handshake(&mut reader, &writer, &config)?;
    info!(session = %handshake.session_id, "session established");

    let shared = Arc::new(Shared {
        writer,
        config,
        handshake,
        running: AtomicBool::new(true),
        table: Mutex::new(ChannelTable::default()),
        open_lock: Mutex::new(()),
    });

    let guard = Arc::new(SessionGuard {
        shared: Arc::clone(&shared),
    });
    Ok((Session { guard }, Dispatcher { reader, shared }))
}

/// Handle to an established session.
#[derive(Clone)]
pub struct Session {
    guard: Arc<SessionGuard>,
}

impl Session {
    fn shared(&self) -> &Shared {
        &self.guard.shared
    }

    /// Open a data channel of the given type.
    pub fn open_channel(&self, channel_type: &str) -> Result<Channel> {
        let timeout = self.shared().config.open_timeout;
        self.open_channel_with_timeout(channel_type, timeout)
    }

    /// Open a data channel, waiting up to `timeout` for the device.
    pub fn open_channel_with_timeout(
        &self,
        channel_type: &str,
        timeout: Duration,
    ) -> Result<Channel> {
        let _serial = self
            .shared()
            .open_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (reply, outcome) = mpsc::sync_channel(1);
        let index = {
            let mut table = self.shared().table();
            if let Some(reason) = &table.closed {
                return Err(SessionError::SessionClosed(reason.clone()));
            }
            let index = table
                .lowest_free_index()
                .ok_or(SessionError::ChannelsExhausted)?;
            table.pending_open = Some(PendingOpen {
                index,
                channel_type: channel_type.to_string(),
                reply,
            });
            index
        };

        debug!(channel = index, channel_type, "requesting channel open");
        let sent = object::encode(&ControlRequest::open(index, channel_type)).and_then(|payload| {
            self.shared()
                .writer
                .send_object(CONTROL_REQUEST, &payload)
                .map_err(SessionError::from)
        });
        if let Err(err) = sent {
            self.shared().table().pending_open = None;
            return Err(err);
        }

        let result = match outcome.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.shared().table().pending_open = None;
                // The loop answers under the table lock, so anything it sent
                // before the slot was cleared is already here.
                match outcome.try_recv() {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(channel = index, "channel open timed out");
                        return Err(SessionError::Timeout(timeout));
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SessionError::SessionClosed(self.shared().closed_reason()));
            }
        };

        match result {
            OpenOutcome::Opened(state) => Ok(Channel::new(state, Arc::clone(&self.guard))),
            OpenOutcome::Refused(status) => Err(SessionError::ChannelOpenFailed { index, status }),
        }
    }

    /// Ask the receive loop to exit cleanly and fail every pending wait.
    pub fn stop(&self) {
        self.shared().shutdown("session stopped");
    }

    /// Whether the receive loop is still serving the session.
    pub fn is_running(&self) -> bool {
        self.shared().is_running()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.shared().handshake.session_id
    }

    pub fn endpoint_profile(&self) -> &EndpointProfile {
        &self.shared().handshake.endpoint_profile
    }

    /// Channels currently registered, including ones awaiting a close
    /// confirmation.
    pub fn channel_count(&self) -> usize {
        self.shared().table().channels.len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", self.session_id())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// The receive loop. Sole owner of the link's read side and receive buffer.
pub struct Dispatcher {
    reader: FrameReader<SharedLink>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Run until the session is stopped (`Ok`) or a fatal error occurs.
    pub fn run(mut self) -> Result<()> {
        loop {
            if !self.shared.is_running() {
                self.shared.shutdown("session stopped");
                debug!("receive loop stopped");
                return Ok(());
            }
            self.run_once()?;
        }
    }

    /// One loop iteration: dispatch at most one frame.
    ///
    /// A fatal error shuts the session down before it is returned.
    pub fn run_once(&mut self) -> Result<()> {
        if !self.shared.is_running() {
            return Err(SessionError::SessionClosed(self.shared.closed_reason()));
        }
        self.step().inspect_err(|err| {
            error!(error = %err, "receive loop failed");
            self.shared.shutdown(&err.to_string());
        })
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("bulklink-dispatch".to_string())
            .spawn(move || self.run())
            .map_err(|err| SessionError::Transport(TransportError::Io(err)))
    }

    fn step(&mut self) -> Result<()> {
        let extracted = match self.reader.try_extract()? {
            Extracted::NeedMoreData => {
                if self.reader.poll()? == 0 {
                    return Ok(());
                }
                self.reader.try_extract()?
            }
            other => other,
        };

        match extracted {
            Extracted::NeedMoreData => Ok(()),
            Extracted::ZeroMarker => Err(SessionError::Protocol(
                "zero-size marker after handshake".to_string(),
            )),
            Extracted::Frame(frame) => self.dispatch(frame),
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        trace!(
            channel = frame.channel,
            channel_name = channel_name(frame.channel),
            terminator = terminator_name(frame.terminator),
            size = frame.payload.len(),
            "frame received"
        );

        if is_data_channel(frame.channel) {
            return self.dispatch_data(frame);
        }
        if frame.channel == CONTROL_RESPONSE {
            if frame.terminator != OBJECT {
                return Err(SessionError::Protocol(format!(
                    "control response with terminator 0x{:02X}",
                    frame.terminator
                )));
            }
            let value = object::decode(&frame.payload)?;
            self.handle_control(ControlResponse::from_value(&value))?;
            return Ok(());
        }
        Err(SessionError::Protocol(format!(
            "frame on unexpected channel 0x{:02X}",
            frame.channel
        )))
    }

    fn dispatch_data(&mut self, frame: Frame) -> Result<()> {
        let index = frame.channel;
        let state = self.shared.table().channels.get(&index).cloned();
        let state = state.ok_or_else(|| {
            SessionError::Protocol(format!("frame for unknown channel {index}"))
        })?;

        match frame.terminator {
            OBJECT => {
                let value = object::decode(&frame.payload)?;
                state.push_object(value);
            }
            BINARY => {
                self.shared.writer.send_binary_ack(index)?;
                state.deliver_binary(frame.payload);
            }
            BINARY_ACK => state.push_ack(),
            other => {
                return Err(SessionError::Protocol(format!(
                    "unknown terminator 0x{other:02X} on channel {index}"
                )))
            }
        }
        Ok(())
    }

    fn handle_control(&mut self, response: ControlResponse) -> Result<()> {
        let Some(index) = response.channel else {
            warn!(status = %response.status, action = ?response.action, "control response without channel");
            return Ok(());
        };

        match (&response.action, response.is_ok()) {
            (ControlAction::Open, true) => self.channel_opened(index),
            (ControlAction::Open, false) => {
                let mut table = self.shared.table();
                match table.pending_open.take_if(|pending| pending.index == index) {
                    Some(pending) => {
                        warn!(channel = index, status = %response.status, "channel open refused");
                        let _ = pending.reply.send(OpenOutcome::Refused(response.status));
                    }
                    None => {
                        warn!(channel = index, status = %response.status, "open failure with no waiter")
                    }
                }
                Ok(())
            }
            (ControlAction::Close, true) => {
                let removed = self.shared.table().channels.remove(&index);
                match removed {
                    Some(state) => {
                        debug!(channel = index, "channel closed");
                        state.mark_closed();
                    }
                    None => warn!(channel = index, "close confirmation for unknown channel"),
                }
                Ok(())
            }
            (ControlAction::Close, false) => {
                error!(channel = index, status = %response.status, "channel close refused");
                Ok(())
            }
            (ControlAction::Unknown(action), _) => {
                warn!(channel = index, action = %action, status = %response.status, "unknown control action");
                Ok(())
            }
        }
    }

    fn channel_opened(&mut self, index: u8) -> Result<()> {
        if !is_data_channel(index) {
            warn!(channel = index, "open confirmation for a non-data index, ignored");
            return Ok(());
        }
        let orphan = {
            let mut table = self.shared.table();
            let pending = table.pending_open.take_if(|pending| pending.index == index);
            let channel_type = pending
                .as_ref()
                .map_or(ORPHAN_CHANNEL_TYPE, |pending| pending.channel_type.as_str());
            let state = Arc::new(ChannelState::new(index, channel_type));
            if let Some(previous) = table.channels.insert(index, Arc::clone(&state)) {
                warn!(channel = previous.index(), "open confirmation replaced a live channel");
                previous.mark_closed();
            }
            match pending {
                Some(pending) => {
                    debug!(channel = index, "channel opened");
                    if pending.reply.send(OpenOutcome::Opened(Arc::clone(&state))).is_err() {
                        // Requester is gone; treat like an unclaimed open.
                        Some(state)
                    } else {
                        None
                    }
                }
                None => Some(state),
            }
        };

        if let Some(state) = orphan {
            warn!(channel = index, "open confirmation with no waiter, closing");
            state.request_close();
            self.shared.request_close(index)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("buffered", &self.reader.buffered())
            .finish_non_exhaustive()
    }
}
