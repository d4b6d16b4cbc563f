//! Client configuration.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_CAP, DEFAULT_MULTIPLIER};
use crate::endpoint::Endpoint;

/// Default bound on a single transport open attempt.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
/// Default maximum consecutive reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Configuration for a streaming client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Primary endpoint to connect to.
    pub primary_endpoint: Endpoint,
    /// Optional failover endpoint.
    pub fallback_endpoint: Option<Endpoint>,
    /// Reconnect automatically after failures.
    pub auto_reconnect: bool,
    /// Base reconnect delay.
    pub base_delay: Duration,
    /// Backoff multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the reconnect delay.
    pub backoff_cap: Duration,
    /// Jitter factor (0.0..=1.0); 0.0 keeps delays deterministic.
    pub jitter: f64,
    /// Maximum consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Bound on a single transport open attempt.
    pub open_timeout: Duration,
    /// Treat this long without inbound frames as a dead connection.
    /// Disabled by default; telemetry feeds may legitimately go quiet.
    pub idle_timeout: Option<Duration>,
    /// Initial session parameters announced on connect.
    pub initial_session_parameters: Map<String, Value>,
}

impl ClientConfig {
    /// Configuration with stock defaults for the given primary endpoint.
    pub fn new(primary: impl Into<Endpoint>) -> Self {
        Self {
            primary_endpoint: primary.into(),
            fallback_endpoint: None,
            auto_reconnect: true,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            backoff_cap: DEFAULT_CAP,
            jitter: 0.0,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            idle_timeout: None,
            initial_session_parameters: Map::new(),
        }
    }

    /// Backoff policy derived from the configured delays.
    pub(crate) fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.backoff_multiplier, self.backoff_cap)
            .with_jitter(self.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ClientConfig::new("feed.example.net:9600");
        assert!(config.auto_reconnect);
        assert_eq!(config.base_delay, Duration::from_millis(5000));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.backoff_cap, Duration::from_millis(60_000));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.jitter, 0.0);
        assert!(config.fallback_endpoint.is_none());
        assert!(config.idle_timeout.is_none());
    }
}
