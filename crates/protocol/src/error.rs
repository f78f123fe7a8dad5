//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match any known message.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame was not a text frame.
    #[error("unsupported frame type")]
    UnsupportedFrame,
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
