//! JSON envelope codec for WebSocket text frames
//!
//! Every frame is a single JSON object:
//! ```text
//! { "type": "<kind>", ...type-specific fields }
//! ```
//!
//! Inbound frames are decoded in two steps so that an unrecognised `type`
//! can be told apart from a recognised one with bad fields.

use serde_json::Value;
use thiserror::Error;

use crate::limits::MAX_MESSAGE_SIZE;
use crate::{ClientMessage, ServerMessage};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Message has no type field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Invalid value for field {0}")]
    InvalidKey(&'static str),

    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode an inbound text frame into a typed message
pub fn decode(text: &str) -> Result<ClientMessage, CodecError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text).map_err(CodecError::Malformed)?;

    match value.get("type").and_then(Value::as_str) {
        None => return Err(CodecError::MissingType),
        Some(kind) if !ClientMessage::KINDS.contains(&kind) => {
            return Err(CodecError::UnknownMessageType(kind.to_owned()));
        }
        Some(_) => {}
    }

    let message: ClientMessage = serde_json::from_value(value).map_err(CodecError::Malformed)?;

    if let Some(field) = message.invalid_key() {
        return Err(CodecError::InvalidKey(field));
    }

    Ok(message)
}

/// Encode an outbound message into a text frame
pub fn encode(message: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Encode)
}

/// Encode an outbound message as a JSON value, for mailbox storage
pub fn encode_value(message: &ServerMessage) -> Result<Value, CodecError> {
    serde_json::to_value(message).map_err(CodecError::Encode)
}
