//! Codecs for Relay frames.
//!
//! Binary frames use MessagePack with length-prefixed framing. Text frames
//! are plain JSON, one frame per WebSocket message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The encoding a peer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON text messages.
    #[default]
    Text,
    /// Length-prefixed MessagePack binary messages.
    Binary,
}

/// A frame encoded for a specific wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFrame {
    Text(String),
    Binary(Bytes),
}

impl EncodedFrame {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            EncodedFrame::Text(text) => text.len(),
            EncodedFrame::Binary(data) => data.len(),
        }
    }

    /// Whether the encoding is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WireFormat {
    /// Encode a frame in this format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the frame is too large.
    pub fn encode(self, frame: &Frame) -> Result<EncodedFrame, ProtocolError> {
        match self {
            WireFormat::Text => encode_text(frame).map(EncodedFrame::Text),
            WireFormat::Binary => encode(frame).map(EncodedFrame::Binary),
        }
    }
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single binary frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = frame_length(data)?;
    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a binary frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// A frame whose body fails to decode is still consumed, so the caller
/// can skip it and keep reading.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = frame_length(buf)?;
    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Encode a frame as a JSON text message.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_text(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a frame from a JSON text message.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_text(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

fn frame_length(data: &[u8]) -> Result<usize, ProtocolError> {
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binary_and_text_agree() {
        let frame = Frame::send_message("u2", json!({"text": "hello", "chatId": 7}));

        let binary = decode(&encode(&frame).unwrap()).unwrap();
        let text = decode_text(&encode_text(&frame).unwrap()).unwrap();

        assert_eq!(binary, frame);
        assert_eq!(text, frame);
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = Frame::new_user("u1");
        let encoded = encode(&frame).unwrap();

        let partial = &encoded[..5];
        match decode(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        buf.extend_from_slice(b"junk");

        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::new_user("u1");
        let frame2 = Frame::send_message("u2", json!("hi"));

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        // Split the second frame across two reads.
        let tail = buf.split_off(buf.len() - 3);

        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame1));
        assert_eq!(decode_from(&mut buf).unwrap(), None);

        buf.extend_from_slice(&tail);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame2));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_body_is_consumed() {
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.extend_from_slice(&[0xc1, 0xc1]);
        encode_into(&Frame::new_user("u1"), &mut buf).unwrap();

        assert!(decode_from(&mut buf).is_err());
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::new_user("u1")));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(decode_text(r#"{"event":"joinRoom","room":"x"}"#).is_err());
        assert!(decode_text("not json").is_err());
    }

    #[test]
    fn test_wire_format_encode() {
        let frame = Frame::get_message(json!("hey"));

        match WireFormat::Text.encode(&frame).unwrap() {
            EncodedFrame::Text(text) => assert_eq!(text, r#"{"event":"getMessage","data":"hey"}"#),
            other => panic!("Expected text, got {:?}", other),
        }
        assert!(matches!(
            WireFormat::Binary.encode(&frame).unwrap(),
            EncodedFrame::Binary(_)
        ));
    }
}
