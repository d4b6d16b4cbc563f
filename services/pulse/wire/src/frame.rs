//! Frame types for the telemetry wire protocol.
//!
//! Every frame on the wire is a JSON object carrying a `kind` discriminator
//! plus kind-specific fields. Known kinds are modeled by [`Frame`]; frames
//! with an unrecognized discriminator still surface as [`RawFrame`]s so
//! misbehaving feeds stay observable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;

/// Maximum frame size (1 MiB default, 16 MiB hard limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;
/// Hard maximum frame size limit (16 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Known `kind` discriminator strings.
pub mod kind {
    /// Server acknowledgment of a new session.
    pub const CONNECT_ACK: &str = "connect-ack";
    /// Telemetry data carrying a domain payload.
    pub const DATA_UPDATE: &str = "data-update";
    /// Server-pushed session parameter change.
    pub const SESSION_UPDATE: &str = "session-update";
    /// Server-reported error condition.
    pub const ERROR: &str = "error";
    /// Server notice of an impending disconnect.
    pub const DISCONNECT_NOTICE: &str = "disconnect-notice";
    /// Client session parameter announcement.
    pub const SET_SESSION_PARAMS: &str = "set-session-params";
    /// Client request to start the data stream.
    pub const REQUEST_DATA: &str = "request-data";
}

/// Typed view of the known frame kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Frame {
    /// Server acknowledgment of a new session.
    ConnectAck {
        /// Opaque session details supplied by the server.
        #[serde(default)]
        session: Value,
    },
    /// Telemetry data update.
    DataUpdate {
        /// Domain payload (opaque to the client core).
        payload: Value,
    },
    /// Server-pushed session parameter change.
    SessionUpdate {
        /// New severity level.
        new_level: i64,
    },
    /// Server-reported error.
    Error {
        /// Human-readable error message.
        message: String,
    },
    /// Server notice that it is about to close the connection.
    DisconnectNotice {
        /// Optional reason string.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Session parameter announcement sent by the client.
    SetSessionParams {
        /// Current parameter set (level, entropy token, extras).
        params: Value,
    },
    /// Client request to start the data stream.
    RequestData,
}

impl Frame {
    /// The `kind` discriminator this frame serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::ConnectAck { .. } => kind::CONNECT_ACK,
            Frame::DataUpdate { .. } => kind::DATA_UPDATE,
            Frame::SessionUpdate { .. } => kind::SESSION_UPDATE,
            Frame::Error { .. } => kind::ERROR,
            Frame::DisconnectNotice { .. } => kind::DISCONNECT_NOTICE,
            Frame::SetSessionParams { .. } => kind::SET_SESSION_PARAMS,
            Frame::RequestData => kind::REQUEST_DATA,
        }
    }
}

/// A decoded frame before kind classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// The `kind` discriminator.
    pub kind: String,
    /// Complete frame body, discriminator included.
    pub body: Value,
}

impl RawFrame {
    /// Parse a frame body, extracting the discriminator.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        let body: Value = serde_json::from_slice(bytes)?;
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(WireError::Discriminator)?
            .to_string();
        Ok(Self { kind, body })
    }

    /// Decode into a typed [`Frame`] if the kind is known.
    pub fn to_frame(&self) -> Option<Frame> {
        serde_json::from_value(self.body.clone()).ok()
    }
}
