use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::DEFAULT_CHANNEL_TIMEOUT;
use crate::error::{Result, SessionError};
use crate::object::{self, Value};
use crate::session::SessionGuard;

/// Receiver for binary payloads arriving on a channel.
///
/// Called on the receive loop after the ack has been sent. The sink is taken
/// out of the channel for the call, so it may replace or clear itself. Closures
/// taking [`Bytes`] implement it directly; see [`forward_to`] for an mpsc
/// sender.
pub trait BinarySink: Send {
    fn on_binary(&mut self, data: Bytes);
}

impl<F> BinarySink for F
where
    F: FnMut(Bytes) + Send,
{
    fn on_binary(&mut self, data: Bytes) {
        self(data)
    }
}

/// A sink that forwards every binary payload into `tx`.
///
/// Payloads are dropped once the receiving side has gone away.
pub fn forward_to(tx: Sender<Bytes>) -> impl BinarySink {
    move |data: Bytes| {
        if tx.send(data).is_err() {
            debug!("binary receiver gone, payload dropped");
        }
    }
}

#[derive(Debug, Clone)]
enum Closure {
    /// Close confirmed by the device.
    Channel,
    /// The receive loop stopped.
    Session(String),
}

#[derive(Default)]
struct SinkSlot {
    sink: Option<Box<dyn BinarySink>>,
    /// Bumped on every set or clear.
    generation: u64,
}

impl SinkSlot {
    fn replace(&mut self, sink: Option<Box<dyn BinarySink>>) {
        self.sink = sink;
        self.generation = self.generation.wrapping_add(1);
    }
}

#[derive(Default)]
struct Inner {
    objects: VecDeque<Value>,
    acks: usize,
    closed: Option<Closure>,
}

/// Per-channel state shared between the receive loop and the handle.
pub(crate) struct ChannelState {
    index: u8,
    channel_type: String,
    inner: Mutex<Inner>,
    object_ready: Condvar,
    ack_ready: Condvar,
    sink: Mutex<SinkSlot>,
    binary_lock: Mutex<()>,
    close_requested: AtomicBool,
}

impl ChannelState {
    pub(crate) fn new(index: u8, channel_type: impl Into<String>) -> Self {
        Self {
            index,
            channel_type: channel_type.into(),
            inner: Mutex::new(Inner::default()),
            object_ready: Condvar::new(),
            ack_ready: Condvar::new(),
            sink: Mutex::new(SinkSlot::default()),
            binary_lock: Mutex::new(()),
            close_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn index(&self) -> u8 {
        self.index
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_object(&self, value: Value) {
        self.lock().objects.push_back(value);
        self.object_ready.notify_one();
    }

    pub(crate) fn push_ack(&self) {
        self.lock().acks += 1;
        self.ack_ready.notify_one();
    }

    fn sink_slot(&self) -> MutexGuard<'_, SinkSlot> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn deliver_binary(&self, data: Bytes) {
        let (taken, generation) = {
            let mut slot = self.sink_slot();
            (slot.sink.take(), slot.generation)
        };
        let Some(mut sink) = taken else {
            warn!(
                channel = self.index,
                size = data.len(),
                "binary data on channel without a sink, dropped"
            );
            return;
        };

        sink.on_binary(data);

        let mut slot = self.sink_slot();
        if slot.generation == generation {
            slot.sink = Some(sink);
        }
    }

    /// The device confirmed the close.
    pub(crate) fn mark_closed(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        self.finish(Closure::Channel);
    }

    /// The session ended; fail every current and future wait.
    pub(crate) fn mark_session_closed(&self, reason: &str) {
        self.finish(Closure::Session(reason.to_string()));
    }

    /// Record a local close request. Returns `false` if one was already made.
    pub(crate) fn request_close(&self) -> bool {
        !self.close_requested.swap(true, Ordering::SeqCst)
    }

    fn finish(&self, closure: Closure) {
        {
            let mut inner = self.lock();
            if inner.closed.is_none() {
                inner.closed = Some(closure);
            }
        }
        self.object_ready.notify_all();
        self.ack_ready.notify_all();
    }

    fn closed_error(&self, closure: &Closure) -> SessionError {
        match closure {
            Closure::Channel => SessionError::ChannelClosed(self.index),
            Closure::Session(reason) => SessionError::SessionClosed(reason.clone()),
        }
    }

    /// Fail if the handle may no longer send.
    fn ensure_sendable(&self) -> Result<()> {
        if let Some(closure) = &self.lock().closed {
            return Err(self.closed_error(closure));
        }
        if self.close_requested.load(Ordering::SeqCst) {
            return Err(SessionError::ChannelClosed(self.index));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.close_requested.load(Ordering::SeqCst) && self.lock().closed.is_none()
    }

    fn wait_object(&self, timeout: Duration) -> Result<Value> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if let Some(value) = inner.objects.pop_front() {
                return Ok(value);
            }
            if let Some(closure) = &inner.closed {
                return Err(self.closed_error(closure));
            }
            if self.close_requested.load(Ordering::SeqCst) {
                return Err(SessionError::ChannelClosed(self.index));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout(timeout));
            }
            inner = self
                .object_ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn reset_acks(&self) {
        self.lock().acks = 0;
    }

    fn wait_ack(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.acks > 0 {
                inner.acks -= 1;
                return Ok(());
            }
            if let Some(closure) = &inner.closed {
                return Err(self.closed_error(closure));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout(timeout));
            }
            inner = self
                .ack_ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// A logical data channel opened on a session.
///
/// Dropping the handle requests the close, same as [`Channel::close`].
pub struct Channel {
    state: Arc<ChannelState>,
    session: Arc<SessionGuard>,
}

impl Channel {
    pub(crate) fn new(state: Arc<ChannelState>, session: Arc<SessionGuard>) -> Self {
        Self { state, session }
    }

    /// Channel index on the wire.
    pub fn index(&self) -> u8 {
        self.state.index
    }

    /// Type name the channel was opened with.
    pub fn channel_type(&self) -> &str {
        &self.state.channel_type
    }

    /// Whether the channel can still carry traffic.
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Send an object. Delivery is not acknowledged.
    pub fn send_object<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.state.ensure_sendable()?;
        let payload = object::encode(value)?;
        self.session.shared.writer.send_object(self.state.index, &payload)?;
        Ok(())
    }

    /// Send a binary block and wait for the device to acknowledge it.
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send_binary_with_timeout(data, DEFAULT_CHANNEL_TIMEOUT)
    }

    /// Send a binary block, waiting up to `timeout` for the acknowledge.
    ///
    /// Only one binary block is in flight per channel; concurrent callers
    /// queue behind each other.
    pub fn send_binary_with_timeout(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let _in_flight = self
            .state
            .binary_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.state.ensure_sendable()?;
        self.state.reset_acks();
        self.session.shared.writer.send_binary(self.state.index, data)?;
        self.state.wait_ack(timeout)
    }

    /// Wait for the next object from the device.
    pub fn get_object(&self) -> Result<Value> {
        self.get_object_with_timeout(DEFAULT_CHANNEL_TIMEOUT)
    }

    /// Wait up to `timeout` for the next object from the device.
    ///
    /// Objects already queued are returned even after the channel or session
    /// has closed.
    pub fn get_object_with_timeout(&self, timeout: Duration) -> Result<Value> {
        self.state.wait_object(timeout)
    }

    /// Wait for the next object and convert it into `T`.
    pub fn get_object_as<T: DeserializeOwned>(&self, timeout: Duration) -> Result<T> {
        object::from_value(self.state.wait_object(timeout)?)
    }

    /// Route incoming binary payloads to `sink`, replacing any previous one.
    pub fn set_binary_sink(&self, sink: impl BinarySink + 'static) {
        self.state.sink_slot().replace(Some(Box::new(sink)));
    }

    /// Stop routing binary payloads; later ones are dropped.
    pub fn clear_binary_sink(&self) {
        self.state.sink_slot().replace(None);
    }

    /// Ask the device to close the channel. Does not wait for the answer.
    ///
    /// Calling it again is a no-op. The index stays reserved until the device
    /// confirms.
    pub fn close(&self) -> Result<()> {
        if !self.state.request_close() {
            return Ok(());
        }
        if !self.session.shared.is_running() {
            return Ok(());
        }
        self.session.shared.request_close(self.state.index)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(channel = self.state.index, error = %err, "close on drop failed");
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.state.index)
            .field("type", &self.state.channel_type)
            .field("open", &self.is_open())
            .finish()
    }
}
