//! Request/reply codecs and reply-topic derivation.
//!
//! Two well-known prefixes pair request and reply domains: a request on
//! the server-to-device prefix (`/sys`) is answered on the
//! device-to-server prefix (`/device`) and vice versa, with `_reply`
//! appended. Topics outside both domains reply on `<topic>_reply`.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::error::TransportError;

/// Server-to-device topic domain
pub const SERVER_TOPIC_PREFIX: &str = "/sys";

/// Device-to-server topic domain
pub const DEVICE_TOPIC_PREFIX: &str = "/device";

/// Wire shape of an error reply
#[derive(Debug, Serialize)]
struct ErrorReply<'a> {
    id: &'a str,
    code: i32,
    #[serde(skip_serializing_if = "str::is_empty")]
    reason: &'a str,
    message: &'a str,
}

/// Payload codec used by request contexts. The default is JSON; custom
/// codecs plug in through [`crate::server::MqttServer::with_codec`].
pub trait Codec: Send + Sync {
    /// Decode a request payload into a JSON value. An empty payload is a
    /// successful no-op and decodes to `Value::Null`.
    fn decode(&self, payload: &[u8]) -> Result<Value, TransportError>;

    /// Encode a reply value to bytes
    fn encode(&self, value: &Value) -> Result<Vec<u8>, TransportError>;

    /// Encode an error into the structured reply body. Never fails: if the
    /// body itself cannot be marshalled the bare message text is returned.
    fn encode_error(&self, err: &TransportError) -> Vec<u8>;
}

/// The default JSON codec
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, payload: &[u8]) -> Result<Value, TransportError> {
        if payload.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(payload).map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(value).map_err(|e| TransportError::Encode(e.to_string()))
    }

    fn encode_error(&self, err: &TransportError) -> Vec<u8> {
        let status = err.to_status();
        let reply = ErrorReply {
            id: &status.id,
            code: status.code,
            reason: &status.reason,
            message: &status.message,
        };
        serde_json::to_vec(&reply).unwrap_or_else(|e| {
            warn!(error = %e, "error reply marshalling failed");
            status.message.into_bytes()
        })
    }
}

/// Derive the reply topic for a request topic by swapping the `/sys` and
/// `/device` prefixes and appending `_reply`.
pub fn reply_topic(topic: &str) -> String {
    if let Some(rest) = topic.strip_prefix(SERVER_TOPIC_PREFIX) {
        format!("{DEVICE_TOPIC_PREFIX}{rest}_reply")
    } else if let Some(rest) = topic.strip_prefix(DEVICE_TOPIC_PREFIX) {
        format!("{SERVER_TOPIC_PREFIX}{rest}_reply")
    } else {
        format!("{topic}_reply")
    }
}
