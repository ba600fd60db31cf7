use std::fmt;

use bulklink_frame::{
    channel_name, Extracted, Frame, FrameReader, FrameWriter, HANDSHAKE_ACK, HANDSHAKE_CONFIRM,
    HANDSHAKE_OFFER, HANDSHAKE_PING, OBJECT,
};
use bulklink_transport::RawLink;
use serde::Serialize;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::object::{self, as_text, map_get, Value};

/// Session id used when an offer carries none.
const UNKNOWN_SESSION: &str = "?";

/// Opaque session identifier proposed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionId(pub Value);

impl SessionId {
    /// The id as text, if the device sent a string.
    pub fn as_str(&self) -> Option<&str> {
        as_text(&self.0)
    }

    /// The raw id value.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.write_str(text),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Capability map the device advertised alongside its session offer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointProfile {
    entries: Vec<(Value, Value)>,
}

impl EndpointProfile {
    /// Look up a capability by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| as_text(k) == Some(key))
            .map(|(_, v)| v)
    }

    /// All advertised entries, in the order the device sent them.
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Unestablished,
    AwaitingPeerOffer,
    AwaitingFinalConfirmation,
    Established,
    HandshakeFailed,
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    pub session_id: SessionId,
    pub endpoint_profile: EndpointProfile,
}

#[derive(Serialize)]
struct HandshakeAck<'a> {
    session: &'a Value,
    client: &'a str,
}

/// Run the client side of the handshake.
///
/// Each round reads once, drains every complete frame and reacts only to the
/// last one. Offers are answered immediately and do not use up a round, nor
/// do zero markers or frames the handshake does not expect. A timeout or a
/// bad confirmation costs one round and sends a ping.
pub fn perform_handshake<R: RawLink, W: RawLink>(
    reader: &mut FrameReader<R>,
    writer: &FrameWriter<W>,
    config: &SessionConfig,
) -> Result<HandshakeResult> {
    let mut state = HandshakeState::Unestablished;
    let mut offered: Option<HandshakeResult> = None;
    let mut retries = config.handshake_retries;

    transition(&mut state, HandshakeState::AwaitingPeerOffer);

    while retries > 0 {
        reader.feed(config.handshake_poll_timeout)?;
        let last = drain_last(reader)?;

        match last {
            Some(Extracted::Frame(frame))
                if frame.channel == HANDSHAKE_OFFER && frame.terminator == OBJECT =>
            {
                let result = parse_offer(&frame)?;
                if offered.is_none() {
                    debug!(session = %result.session_id, "got handshake session");
                } else {
                    debug!(session = %result.session_id, "replacing handshake session");
                }

                let ack = HandshakeAck {
                    session: result.session_id.value(),
                    client: &config.client_identity,
                };
                writer.send_object(HANDSHAKE_ACK, &object::encode(&ack)?)?;
                offered = Some(result);
                transition(&mut state, HandshakeState::AwaitingFinalConfirmation);
                continue;
            }
            Some(Extracted::Frame(frame))
                if frame.channel == HANDSHAKE_CONFIRM && frame.terminator == OBJECT =>
            {
                match offered.take() {
                    Some(result) => {
                        let confirmed = confirmed_session(&frame)?;
                        if confirmed.as_ref() == Some(result.session_id.value()) {
                            transition(&mut state, HandshakeState::Established);
                            debug!(session = %result.session_id, "handshake completed");
                            return Ok(result);
                        }
                        debug!(
                            expected = %result.session_id,
                            received = ?confirmed,
                            "final handshake carried the wrong session"
                        );
                        transition(&mut state, HandshakeState::AwaitingPeerOffer);
                    }
                    None => debug!("final handshake before any offer"),
                }
            }
            Some(Extracted::ZeroMarker) => {
                debug!("zero marker during handshake");
                continue;
            }
            Some(Extracted::Frame(frame)) => {
                debug!(
                    channel = frame.channel,
                    channel_name = channel_name(frame.channel),
                    terminator = frame.terminator,
                    "unexpected frame during handshake"
                );
                continue;
            }
            Some(Extracted::NeedMoreData) | None => {
                debug!(remaining = retries - 1, "handshake round timed out");
            }
        }

        retries -= 1;
        writer.send_object(HANDSHAKE_PING, &object::nil())?;
    }

    transition(&mut state, HandshakeState::HandshakeFailed);
    Err(SessionError::HandshakeFailed(format!(
        "no session confirmation after {} rounds",
        config.handshake_retries
    )))
}

fn transition(state: &mut HandshakeState, next: HandshakeState) {
    if *state != next {
        debug!(from = ?*state, to = ?next, "handshake state");
        *state = next;
    }
}

fn drain_last<R: RawLink>(reader: &mut FrameReader<R>) -> Result<Option<Extracted>> {
    let mut last = None;
    loop {
        match reader.try_extract()? {
            Extracted::NeedMoreData => return Ok(last),
            other => last = Some(other),
        }
    }
}

fn parse_offer(frame: &Frame) -> Result<HandshakeResult> {
    let value = object::decode(&frame.payload)?;
    let entries = match value {
        Value::Map(entries) => entries,
        other => {
            return Err(SessionError::Protocol(format!(
                "handshake offer is not a map: {other}"
            )))
        }
    };

    let mut session = None;
    let mut profile = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        if as_text(&key) == Some("session") {
            session = Some(value);
        } else {
            profile.push((key, value));
        }
    }

    Ok(HandshakeResult {
        session_id: SessionId(session.unwrap_or_else(|| Value::from(UNKNOWN_SESSION))),
        endpoint_profile: EndpointProfile { entries: profile },
    })
}

fn confirmed_session(frame: &Frame) -> Result<Option<Value>> {
    let value = object::decode(&frame.payload)?;
    Ok(map_get(&value, "session").cloned())
}
