//! Frame <-> socket message boundary.
//!
//! Frames are decoded exactly once, here. A payload that is not valid JSON
//! or lacks a `type` field is a [`CodecError`]; the session logs it and
//! drops the message without touching the connection.

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::CodecError;
use crate::protocol::Frame;

/// One socket-level message, before or after the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireMessage::Text(text) => Some(text),
            WireMessage::Binary(_) => None,
        }
    }
}

/// A decoded frame and when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub frame: Frame,
    pub received_at: Instant,
}

impl InboundFrame {
    pub fn new(frame: Frame, received_at: Instant) -> Self {
        Self { frame, received_at }
    }
}

/// JSON codec for [`Frame`]s. Socket messages are already delimited, so
/// one message is always one frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame as a text message.
    pub fn encode_frame(&self, frame: &Frame) -> Result<WireMessage, CodecError> {
        serde_json::to_string(frame)
            .map(WireMessage::Text)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode one socket message. Binary payloads must be UTF-8 JSON.
    pub fn decode_message(&self, message: &WireMessage) -> Result<Frame, CodecError> {
        match message {
            WireMessage::Text(text) => self.decode_str(text),
            WireMessage::Binary(bytes) => self.decode_str(std::str::from_utf8(bytes)?),
        }
    }

    pub fn decode_str(&self, text: &str) -> Result<Frame, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_as_text() {
        let msg = FrameCodec.encode_frame(&Frame::shell_command("ls -la")).unwrap();
        assert_eq!(
            msg.as_text(),
            Some(r#"{"type":"shell-command","command":"ls -la"}"#)
        );
    }

    #[test]
    fn decodes_binary_json() {
        let msg = WireMessage::Binary(Bytes::from_static(br#"{"type":"shell-output","data":"ok\n"}"#));
        let frame = FrameCodec.decode_message(&msg).unwrap();
        assert_eq!(
            frame,
            Frame::ShellOutput {
                data: "ok\n".into()
            }
        );
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = FrameCodec
            .decode_message(&WireMessage::Text("{\"type\":".into()))
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn missing_type_is_malformed() {
        let err = FrameCodec.decode_str(r#"{"content":"hi"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn binary_must_be_utf8() {
        let err = FrameCodec
            .decode_message(&WireMessage::Binary(Bytes::from_static(&[0xff, 0xfe, 0x00])))
            .unwrap_err();
        assert_eq!(err, CodecError::InvalidUtf8);
    }

    #[test]
    fn wire_message_len() {
        assert_eq!(WireMessage::Text("héllo".into()).len(), 6);
        assert!(WireMessage::Binary(Bytes::new()).is_empty());
    }
}
