//! Codec for encoding and decoding channel frames.
//!
//! Two encodings are supported. JSON frames travel as text messages and are
//! the default; MessagePack frames travel as binary messages and carry the
//! same five element array.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Message kind does not match the configured encoding.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Frame serializer negotiated with the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON array in a text message.
    #[default]
    Json,
    /// MessagePack array in a binary message.
    #[serde(alias = "messagepack")]
    Msgpack,
}

/// An encoded frame, ready for a message-oriented transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    /// Whether the encoded frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a frame with the given encoding.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame, encoding: Encoding) -> Result<WireMessage, ProtocolError> {
    let message = match encoding {
        Encoding::Json => WireMessage::Text(serde_json::to_string(frame)?),
        Encoding::Msgpack => WireMessage::Binary(Bytes::from(rmp_serde::to_vec(frame)?)),
    };

    if message.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(message.len()));
    }

    Ok(message)
}

/// Decode a frame from a text message.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid frame.
pub fn decode_text(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode a frame from a binary message.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid frame.
pub fn decode_binary(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(rmp_serde::from_slice(data)?)
}

/// Decode a frame from either kind of message.
///
/// # Errors
///
/// Returns an error if the message does not hold a valid frame.
pub fn decode(message: &WireMessage) -> Result<Frame, ProtocolError> {
    match message {
        WireMessage::Text(text) => decode_text(text),
        WireMessage::Binary(data) => decode_binary(data),
    }
}

/// Codec bound to a single encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec {
    encoding: Encoding,
}

impl FrameCodec {
    /// Create a codec for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// Encode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<WireMessage, ProtocolError> {
        encode(frame, self.encoding)
    }

    /// Decode a frame. Binary messages are rejected by a JSON codec.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, message: &WireMessage) -> Result<Frame, ProtocolError> {
        match (self.encoding, message) {
            (Encoding::Json, WireMessage::Binary(_)) => Err(ProtocolError::Invalid(
                "binary message on a JSON socket".into(),
            )),
            _ => decode(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_is_text_array() {
        let frame = Frame::push("1", "2", "room:lobby", "new_msg", json!({"body": "hi"}));
        let encoded = encode(&frame, Encoding::Json).unwrap();
        assert_eq!(
            encoded,
            WireMessage::Text(r#"["1","2","room:lobby","new_msg",{"body":"hi"}]"#.to_string())
        );
        assert_eq!(decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_msgpack_is_binary() {
        let frame = Frame::heartbeat("9");
        let encoded = encode(&frame, Encoding::Msgpack).unwrap();
        assert!(matches!(encoded, WireMessage::Binary(_)));
        assert_eq!(decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_decode_invalid_text() {
        match decode_text(r#"{"topic":"room"}"#) {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let large_payload = "x".repeat(MAX_FRAME_SIZE + 1);
        let frame = Frame::broadcast("test", "big", json!(large_payload));

        match encode(&frame, Encoding::Json) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_codec_rejects_binary() {
        let codec = FrameCodec::new(Encoding::Json);
        let binary = encode(&Frame::heartbeat("1"), Encoding::Msgpack).unwrap();
        assert!(matches!(
            codec.decode(&binary),
            Err(ProtocolError::Invalid(_))
        ));
    }

    #[test]
    fn test_encoding_from_config_string() {
        let encoding: Encoding = serde_json::from_value(json!("msgpack")).unwrap();
        assert_eq!(encoding, Encoding::Msgpack);
        assert_eq!(Encoding::default(), Encoding::Json);
    }
}
