//! Session layer for bulklink.
//!
//! A session is established over one raw link by a short handshake in which
//! the device offers a session id and the client acknowledges it. After that a
//! single receive loop ([`Dispatcher`]) demultiplexes frames into logical
//! [`Channel`]s, which are opened and closed through control messages.
//!
//! Payloads are either objects (MessagePack) or acknowledged binary blocks.

pub mod channel;
pub mod config;
pub mod control;
pub mod emulator;
pub mod error;
pub mod handshake;
pub mod object;
pub mod session;

#[cfg(test)]
mod testing;

pub use channel::{forward_to, BinarySink, Channel};
pub use config::{SessionConfig, DEFAULT_CHANNEL_TIMEOUT};
pub use control::{ControlAction, ControlReply, ControlRequest, ControlResponse};
pub use emulator::{DeviceEmulator, EmulatorConfig, EmulatorHandle, EmulatorStats};
pub use error::{Result, SessionError};
pub use handshake::{
    perform_handshake, EndpointProfile, HandshakeResult, HandshakeState, SessionId,
};
pub use object::Value;
pub use session::{connect, Dispatcher, Session};
