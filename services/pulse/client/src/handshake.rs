//! Session parameter negotiation.
//!
//! On every transition into Connected the client announces its current
//! parameter set and requests the data stream; the server may push level
//! changes back mid-session, which are applied locally without an echo.

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ClientError;
use pulse_wire::Frame;

/// Lowest valid severity level.
pub const MIN_LEVEL: i64 = 1;
/// Highest valid severity level.
pub const MAX_LEVEL: i64 = 9;
/// Level used when none is configured.
pub const DEFAULT_LEVEL: i64 = 1;

/// The negotiated session parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// Severity level, validated against `MIN_LEVEL..=MAX_LEVEL`.
    pub level: i64,
    /// Locally computed opaque entropy token.
    pub entropy: String,
    /// Host-supplied opaque parameters, passed through verbatim.
    pub extra: Map<String, Value>,
}

impl SessionParams {
    /// JSON object form used on the wire and in the public map view.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("level".to_string(), Value::from(self.level));
        map.insert("entropy".to_string(), Value::from(self.entropy.clone()));
        for (name, value) in &self.extra {
            map.insert(name.clone(), value.clone());
        }
        map
    }
}

/// Builds and re-sends session parameters across (re)connects and applies
/// parameter updates from either side.
#[derive(Debug)]
pub struct HandshakeNegotiator {
    params: SessionParams,
}

impl HandshakeNegotiator {
    /// Build a negotiator from host-supplied initial parameters.
    ///
    /// A supplied `level` outside the valid range falls back to the
    /// default with a warning; construction itself never fails. The
    /// entropy token is always computed locally.
    pub fn new(initial: Map<String, Value>) -> Self {
        let mut level = DEFAULT_LEVEL;
        let mut extra = Map::new();

        for (name, value) in initial {
            match name.as_str() {
                "level" => match value.as_i64() {
                    Some(v) if (MIN_LEVEL..=MAX_LEVEL).contains(&v) => level = v,
                    _ => warn!(
                        "initial level {} outside {}..={}, using {}",
                        value, MIN_LEVEL, MAX_LEVEL, DEFAULT_LEVEL
                    ),
                },
                "entropy" => warn!("ignoring host-supplied entropy token"),
                _ => {
                    extra.insert(name, value);
                }
            }
        }

        let entropy = Uuid::new_v4().simple().to_string();
        Self {
            params: SessionParams {
                level,
                entropy,
                extra,
            },
        }
    }

    /// Current parameter set.
    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Frames sent on every transition into Connected: the parameter
    /// announcement followed by the data request.
    pub fn connect_frames(&self) -> [Frame; 2] {
        [self.params_frame(), Frame::RequestData]
    }

    /// Frame announcing the current parameter set.
    pub fn params_frame(&self) -> Frame {
        Frame::SetSessionParams {
            params: Value::Object(self.params.to_map()),
        }
    }

    /// Apply a server-pushed level change.
    ///
    /// The update is never echoed back to the peer.
    pub fn apply_remote_level(&mut self, new_level: i64) {
        debug!(
            "server moved session level {} -> {}",
            self.params.level, new_level
        );
        self.params.level = new_level;
    }

    /// Apply a client-initiated parameter change.
    ///
    /// `level` values are validated locally against the closed range and
    /// rejected without any network traffic when out of range; other
    /// names are stored verbatim.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> Result<(), ClientError> {
        match name {
            "level" => {
                let level = value
                    .as_i64()
                    .filter(|v| (MIN_LEVEL..=MAX_LEVEL).contains(v))
                    .ok_or_else(|| {
                        warn!("rejecting level {}: outside {}..={}", value, MIN_LEVEL, MAX_LEVEL);
                        ClientError::InvalidParameter {
                            name: name.to_string(),
                            reason: format!("level must be an integer in {MIN_LEVEL}..={MAX_LEVEL}"),
                        }
                    })?;
                self.params.level = level;
            }
            "entropy" => {
                return Err(ClientError::InvalidParameter {
                    name: name.to_string(),
                    reason: "entropy token is locally computed".to_string(),
                });
            }
            _ => {
                self.params.extra.insert(name.to_string(), value);
            }
        }
        Ok(())
    }
}
