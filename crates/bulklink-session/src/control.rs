use serde::Serialize;

use crate::object::{as_text, map_get, Value};

/// Control action: open a channel.
pub const ACTION_OPEN: &str = "open";
/// Control action: close a channel.
pub const ACTION_CLOSE: &str = "close";
/// Control status: request succeeded.
pub const STATUS_OK: &str = "ok";

/// Channel lifecycle request, sent on the control-request id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ControlRequest {
    pub channel: u8,
    pub action: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
}

impl ControlRequest {
    /// Request to open channel `index` of the given type.
    pub fn open(index: u8, channel_type: &str) -> Self {
        Self {
            channel: index,
            action: ACTION_OPEN.to_string(),
            channel_type: Some(channel_type.to_string()),
        }
    }

    /// Request to close channel `index`.
    pub fn close(index: u8) -> Self {
        Self {
            channel: index,
            action: ACTION_CLOSE.to_string(),
            channel_type: None,
        }
    }

    /// Read a request back out of a decoded object (device side).
    pub fn from_value(value: &Value) -> Option<Self> {
        let channel = map_get(value, "channel")
            .and_then(Value::as_u64)
            .and_then(|index| u8::try_from(index).ok())?;
        let action = map_get(value, "action").and_then(as_text)?.to_string();
        let channel_type = map_get(value, "type").and_then(as_text).map(str::to_string);
        Some(Self {
            channel,
            action,
            channel_type,
        })
    }
}

/// Wire form of a control response, as a device sends it.
#[derive(Debug, Clone, Serialize)]
pub struct ControlReply<'a> {
    pub channel: u8,
    pub status: &'a str,
    pub action: &'a str,
}

/// What a control response asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Open,
    Close,
    Unknown(String),
}

/// Channel lifecycle response, received on the control-response id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub channel: Option<u8>,
    pub status: String,
    pub action: ControlAction,
}

impl ControlResponse {
    /// Read `{channel, status, action}` out of a decoded object.
    ///
    /// Missing or mistyped fields are kept as "unknown" values so that the
    /// caller can log and ignore them instead of failing the session.
    pub fn from_value(value: &Value) -> Self {
        let channel = map_get(value, "channel")
            .and_then(Value::as_u64)
            .and_then(|index| u8::try_from(index).ok());
        let status = map_get(value, "status")
            .and_then(as_text)
            .unwrap_or_default()
            .to_string();
        let action = match map_get(value, "action").and_then(as_text) {
            Some(ACTION_OPEN) => ControlAction::Open,
            Some(ACTION_CLOSE) => ControlAction::Close,
            Some(other) => ControlAction::Unknown(other.to_string()),
            None => ControlAction::Unknown(String::new()),
        };
        Self {
            channel,
            status,
            action,
        }
    }

    /// Whether the device reported success.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}
