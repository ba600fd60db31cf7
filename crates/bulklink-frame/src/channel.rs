//! Reserved channel ids.
//!
//! Ids below [`DATA_CHANNEL_LIMIT`] are multiplexed data channels allocated by
//! the session. The remaining values used on the wire are reserved for the
//! handshake and for channel lifecycle control.

/// First id that is not a multiplexed data channel.
pub const DATA_CHANNEL_LIMIT: u8 = 0x80;

/// Channel open/close requests (client to device).
pub const CONTROL_REQUEST: u8 = 0xF0;

/// Channel open/close responses (device to client).
pub const CONTROL_RESPONSE: u8 = 0xF1;

/// Keep-alive ping sent by the client while the handshake retries.
pub const HANDSHAKE_PING: u8 = 0xFC;

/// Final handshake confirmation (device to client).
pub const HANDSHAKE_CONFIRM: u8 = 0xFD;

/// Handshake acknowledge (client to device).
pub const HANDSHAKE_ACK: u8 = 0xFE;

/// Session offer (device to client).
pub const HANDSHAKE_OFFER: u8 = 0xFF;

/// Returns true if the id addresses a multiplexed data channel.
pub fn is_data_channel(id: u8) -> bool {
    id < DATA_CHANNEL_LIMIT
}

/// Returns a human-readable name for a channel id.
pub fn channel_name(id: u8) -> &'static str {
    match id {
        CONTROL_REQUEST => "CONTROL_REQUEST",
        CONTROL_RESPONSE => "CONTROL_RESPONSE",
        HANDSHAKE_PING => "HANDSHAKE_PING",
        HANDSHAKE_CONFIRM => "HANDSHAKE_CONFIRM",
        HANDSHAKE_ACK => "HANDSHAKE_ACK",
        HANDSHAKE_OFFER => "HANDSHAKE_OFFER",
        id if is_data_channel(id) => "DATA",
        _ => "RESERVED",
    }
}
