//! JSON codec for streaming frames
//!
//! Every message on the stream is one WebSocket frame holding a JSON
//! document:
//! ```text
//! [ text frame: UTF-8 JSON ]  or  [ binary frame: UTF-8 JSON bytes ]
//! ```
//!
//! Outbound messages are always encoded as text frames. Inbound frames of
//! either kind are accepted.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::limits::MAX_MESSAGE_SIZE;

/// One discrete message sent or received over the streaming connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw payload bytes, regardless of frame kind
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_owned())
    }
}

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message into a JSON text frame
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Frame, CodecError> {
    let text = serde_json::to_string(message)?;

    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(text.len()));
    }

    Ok(Frame::Text(text))
}

/// Decode a frame into an application message
///
/// Oversize frames are rejected before any parsing happens.
pub fn decode<T: DeserializeOwned>(frame: &Frame) -> Result<T, CodecError> {
    if frame.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(frame.len()));
    }

    Ok(serde_json::from_slice(frame.as_bytes())?)
}
