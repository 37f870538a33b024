//! Wire protocol message types.
//!
//! All communication between peerlink nodes uses JSON-framed messages over
//! TCP. Each frame is prefixed with a 4-byte big-endian length header.
//!
//! Every outbound link starts with a [`SessionMessage`] announcing where the
//! connecting node listens. After that the link carries [`TransferMessage`]s
//! (requests and responses) and heartbeats.

use crate::error::{WireError, WireResult};
use serde::{Deserialize, Serialize};

/// One framed unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Session handshake, sent once per outbound link.
    #[serde(rename = "session")]
    Session(SessionMessage),
    /// Request or response envelope.
    #[serde(rename = "transfer")]
    Transfer(TransferMessage),
    /// Idle keepalive; carries nothing.
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Session handshake: identifies the connecting node to the far side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Host the connecting node advertises for its own listener.
    pub host_name: String,
    /// Port the connecting node listens on.
    pub port: u16,
    /// Name of the message handler the far side should use for our requests.
    pub handler_descriptor: String,
}

impl SessionMessage {
    pub fn new(host_name: impl Into<String>, port: u16, handler_descriptor: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            handler_descriptor: handler_descriptor.into(),
        }
    }
}

/// Kind of a [`TransferMessage`], encoded on the wire as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    Request,
    Response,
}

impl MessageType {
    /// Integer code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            other => Err(format!("unknown message type code {other}")),
        }
    }
}

/// Request/response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMessage {
    /// Session id of the sending node.
    pub session_id: String,
    /// Request or response.
    pub message_type: MessageType,
    /// Correlation key binding a response to its request.
    pub key: String,
    /// Opaque payload, base64 on the wire.
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
}

impl TransferMessage {
    /// Build an envelope. The key must not be empty.
    pub fn new(
        session_id: impl Into<String>,
        message_type: MessageType,
        key: impl Into<String>,
        payload: Vec<u8>,
    ) -> WireResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(WireError::Protocol(
                "transfer message requires a non-empty key".to_string(),
            ));
        }
        Ok(Self {
            session_id: session_id.into(),
            message_type,
            key,
            payload,
        })
    }

    pub fn is_request(&self) -> bool {
        self.message_type == MessageType::Request
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Encode a frame to bytes (4-byte big-endian length + JSON).
pub fn encode_frame(frame: &Frame) -> WireResult<Vec<u8>> {
    let json = serde_json::to_vec(frame)?;
    let len = u32::try_from(json.len()).map_err(|_| WireError::MessageTooLarge {
        size: u32::MAX,
        max: u32::MAX,
    })?;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a frame.
pub fn decode_frame(body: &[u8]) -> WireResult<Frame> {
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, payload: &[u8]) -> TransferMessage {
        TransferMessage::new("73657373", MessageType::Request, key, payload.to_vec()).unwrap()
    }

    #[test]
    fn test_encode_decode_transfer() {
        let frame = Frame::Transfer(request("k1", b"ping"));
        let bytes = encode_frame(&frame).unwrap();
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        assert_eq!(decode_frame(&bytes[4..]).unwrap(), frame);
    }

    #[test]
    fn test_message_type_is_integer_code() {
        let json = serde_json::to_value(Frame::Transfer(request("k1", b""))).unwrap();
        assert_eq!(json["type"], "transfer");
        assert_eq!(json["message_type"], 0);

        let mut response = request("k1", b"");
        response.message_type = MessageType::Response;
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["message_type"], 1);
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let body = br#"{"type":"transfer","session_id":"s","message_type":7,"key":"k","payload":""}"#;
        assert!(decode_frame(body).is_err());
    }

    #[test]
    fn test_payload_is_base64() {
        let json = serde_json::to_value(request("k1", b"pong")).unwrap();
        assert_eq!(json["payload"], "cG9uZw==");
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = TransferMessage::new("s", MessageType::Response, "", vec![]).unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }

    #[test]
    fn test_session_and_heartbeat_frames() {
        let session = Frame::Session(SessionMessage::new("127.0.0.1", 9100, "echo"));
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"type\":\"session\""));
        assert!(json.contains("echo"));
        assert_eq!(serde_json::from_str::<Frame>(&json).unwrap(), session);

        let json = serde_json::to_string(&Frame::Heartbeat).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat"}"#);
        assert_eq!(serde_json::from_str::<Frame>(&json).unwrap(), Frame::Heartbeat);
    }
}
