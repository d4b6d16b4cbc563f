//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Frame body is not valid JSON
    #[error("malformed frame body: {0}")]
    Body(#[from] serde_json::Error),

    /// Frame body lacks a string `kind` discriminator
    #[error("missing kind discriminator")]
    Discriminator,
}

impl WireError {
    /// Whether the stream can keep decoding after this error.
    ///
    /// Body-level errors consume exactly one frame and leave the decoder
    /// positioned at the next frame boundary. A length-prefix violation
    /// cannot be resynced.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WireError::Body(_) | WireError::Discriminator)
    }
}
