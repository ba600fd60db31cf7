//! Terminator bytes: the last byte of every frame, naming the payload kind.

/// Payload is an encoded object.
pub const OBJECT: u8 = 0xF0;

/// Payload is a raw binary block that the receiver must acknowledge.
pub const BINARY: u8 = 0xFF;

/// Binary acknowledgment as recognised by the receive loop.
pub const BINARY_ACK: u8 = 0xC0;

/// Binary acknowledgment as emitted after receiving a binary block.
///
/// Deliberately not equal to [`BINARY_ACK`]; devices in the field expect
/// exactly these two values.
pub const BINARY_ACK_SENT: u8 = 0x80;

/// Returns a human-readable name for a terminator byte.
pub fn terminator_name(terminator: u8) -> &'static str {
    match terminator {
        OBJECT => "OBJECT",
        BINARY => "BINARY",
        BINARY_ACK => "BINARY_ACK",
        BINARY_ACK_SENT => "BINARY_ACK_SENT",
        _ => "UNKNOWN",
    }
}
