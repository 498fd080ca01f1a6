//! Protocol error types

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Tagged message did not match the schema
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Whether this error was raised while decoding
    pub fn is_decode(&self) -> bool {
        matches!(self, ProtocolError::Decode(_))
    }
}
