//! Relay error taxonomy

use relay_shared::codec::CodecError;
use relay_shared::ServerMessage;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced to a connection as an `error` envelope
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Viewer limit reached for this session")]
    CapacityExceeded,

    #[error("You were blocked by the admin and cannot view this location")]
    Blocked,

    #[error("New viewers are not allowed")]
    ViewersNotAllowed,

    #[error("Only the session admin can do this")]
    Unauthorized,

    #[error("Unknown message type")]
    UnknownMessageType,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Connection error: {0}")]
    TransportError(String),

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl RelayError {
    /// Stable identifier carried in the `code` field on the wire
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::SessionNotFound => "SessionNotFound",
            RelayError::CapacityExceeded => "CapacityExceeded",
            RelayError::Blocked => "Blocked",
            RelayError::ViewersNotAllowed => "ViewersNotAllowed",
            RelayError::Unauthorized => "Unauthorized",
            RelayError::UnknownMessageType => "UnknownMessageType",
            RelayError::InvalidMessage(_) => "InvalidMessage",
            RelayError::TransportError(_) => "TransportError",
            RelayError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }

    /// Build the `error` envelope for this error
    pub fn to_message(&self) -> ServerMessage {
        let message = match self {
            // Store internals stay in the logs
            RelayError::StoreUnavailable(_) => "Session store unavailable, try again".to_string(),
            other => other.to_string(),
        };
        ServerMessage::error(self.code(), message)
    }
}

impl From<CodecError> for RelayError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::MissingType | CodecError::UnknownMessageType(_) => RelayError::UnknownMessageType,
            other => RelayError::InvalidMessage(other.to_string()),
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
