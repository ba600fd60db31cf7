//! Object payload codec (MessagePack).
//!
//! Outbound objects are any `Serialize` value, encoded with struct fields as
//! map keys. Inbound objects decode to a dynamic [`Value`]. Devices send map
//! keys and short strings either as MessagePack strings or as byte strings;
//! the lookup helpers accept both.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use rmpv::Value;

/// Encode a value as a MessagePack object payload.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode an object payload into a dynamic value.
pub fn decode(payload: &[u8]) -> Result<Value> {
    let mut cursor = payload;
    Ok(rmpv::decode::read_value(&mut cursor)?)
}

/// Convert a decoded value into a typed one.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(rmpv::ext::from_value(value)?)
}

/// The payload of a nil object.
pub fn nil() -> Vec<u8> {
    vec![0xC0]
}

/// Text content of a string or UTF-8 byte-string value.
pub fn as_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => s.as_str(),
        Value::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

/// Look up `key` in a map value, matching string and byte-string keys.
pub fn map_get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| as_text(k) == Some(key))
            .map(|(_, v)| v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Probe {
        channel: u8,
        action: String,
    }

    #[test]
    fn structs_encode_as_maps() {
        let payload = encode(&Probe {
            channel: 2,
            action: "open".to_string(),
        })
        .unwrap();
        let value = decode(&payload).unwrap();

        assert_eq!(map_get(&value, "channel").and_then(Value::as_u64), Some(2));
        assert_eq!(map_get(&value, "action").and_then(as_text), Some("open"));
    }

    #[test]
    fn byte_string_keys_are_found() {
        let value = Value::Map(vec![(
            Value::Binary(b"status".to_vec()),
            Value::Binary(b"ok".to_vec()),
        )]);
        assert_eq!(map_get(&value, "status").and_then(as_text), Some("ok"));
        assert!(map_get(&value, "missing").is_none());
    }

    #[test]
    fn typed_conversion() {
        let payload = encode(&Probe {
            channel: 9,
            action: "close".to_string(),
        })
        .unwrap();
        let probe: Probe = from_value(decode(&payload).unwrap()).unwrap();
        assert_eq!(probe.action, "close");
        assert_eq!(probe.channel, 9);
    }

    #[test]
    fn nil_payload_decodes_to_nil() {
        assert_eq!(decode(&nil()).unwrap(), Value::Nil);
        assert_eq!(encode(&()).unwrap(), nil());
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut payload = encode(&"a longer string value").unwrap();
        payload.truncate(4);
        assert!(decode(&payload).is_err());
    }

    #[test]
    fn non_map_lookup_is_none() {
        assert!(map_get(&Value::from(5), "x").is_none());
    }
}
