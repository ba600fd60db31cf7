//! Multiplexed object and binary channels to embedded devices over USB bulk
//! links.
//!
//! bulklink frames every message with a size, a channel id and a terminator,
//! establishes a session with a short handshake and then carries many logical
//! channels over one link. Objects travel as MessagePack; binary blocks are
//! acknowledged one at a time.
//!
//! # Crate Structure
//!
//! - [`transport`] - raw duplex link abstraction (`RawLink`, Unix sockets, in-memory pairs)
//! - [`frame`] - frame codec, channel ids and terminators
//! - [`session`] - handshake, receive loop, channels and the device emulator
//!
//! ```no_run
//! use bulklink::transport::UnixDomainSocket;
//! use bulklink::session::{connect, SessionConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let link = UnixDomainSocket::connect("/run/device-bridge.sock")?;
//! let (session, dispatcher) = connect(link, SessionConfig::default())?;
//! let _loop = dispatcher.spawn()?;
//!
//! let channel = session.open_channel("robot")?;
//! channel.send_object(&("status", 1))?;
//! let reply = channel.get_object()?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use bulklink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use bulklink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use bulklink_session::*;
}

pub use bulklink_session::{
    connect, Channel, Dispatcher, Session, SessionConfig, SessionError, Value,
};
