//! Raw duplex link abstraction for bulklink.
//!
//! A link is anything that can write a block of bytes and perform a single
//! bounded-timeout read of up to N bytes. On real hardware this is a USB bulk
//! endpoint pair claimed by the host application; this crate provides:
//! - [`RawLink`], the boundary the framing and session layers consume
//! - [`StreamLink`], a link over a connected socket (device bridges, emulators)
//! - [`MemoryLink`], an in-process link pair
//!
//! Device discovery and interface claiming stay with the caller.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryLink;
pub use traits::RawLink;

#[cfg(unix)]
pub use uds::{StreamLink, UnixDomainSocket};
