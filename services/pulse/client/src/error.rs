//! Client error types.

use thiserror::Error;

/// Errors surfaced by the public client API.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Operation requires an established connection
    #[error("not connected")]
    NotConnected,

    /// Session parameter rejected by local validation
    #[error("invalid session parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name as supplied by the caller
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// The transport failed while performing the operation
    #[error("transport error: {0}")]
    Transport(String),

    /// The client driver task has shut down
    #[error("client closed")]
    Closed,
}
