//! Endpoint selection with single-cycle failover.

use std::fmt;

/// A connection target, e.g. `feed.example.net:9600`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(String);

impl Endpoint {
    /// Create an endpoint from an address string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for Endpoint {
    fn from(addr: String) -> Self {
        Self::new(addr)
    }
}

/// Which configured target is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveEndpoint {
    /// The primary target.
    Primary,
    /// The failover target.
    Fallback,
}

impl ActiveEndpoint {
    /// Stable string form for logs and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveEndpoint::Primary => "primary",
            ActiveEndpoint::Fallback => "fallback",
        }
    }
}

/// Chooses between the primary and fallback targets across a reconnect
/// cycle.
///
/// The first attempt of every cycle targets the primary. After a primary
/// failure the selector flips to the fallback exactly once per cycle;
/// once the fallback has also failed, both are retried in order on later
/// attempts under the same backoff schedule. A fresh `connect()` always
/// starts again at the primary.
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    primary: Endpoint,
    fallback: Option<Endpoint>,
    active: ActiveEndpoint,
    fallback_tried: bool,
}

impl EndpointSelector {
    /// Create a selector over a primary and optional fallback target.
    pub fn new(primary: Endpoint, fallback: Option<Endpoint>) -> Self {
        Self {
            primary,
            fallback,
            active: ActiveEndpoint::Primary,
            fallback_tried: false,
        }
    }

    /// Target for the upcoming attempt.
    pub fn current(&self) -> &Endpoint {
        match self.active {
            ActiveEndpoint::Primary => &self.primary,
            // `active` is only ever Fallback when one is configured.
            ActiveEndpoint::Fallback => self.fallback.as_ref().unwrap_or(&self.primary),
        }
    }

    /// Which configured target is active.
    pub fn active(&self) -> ActiveEndpoint {
        self.active
    }

    /// Reset to the primary for a fresh connect cycle.
    pub fn reset(&mut self) {
        self.active = ActiveEndpoint::Primary;
        self.fallback_tried = false;
    }

    /// Record a failed attempt against the current target and choose the
    /// target for the next attempt.
    pub fn on_failure(&mut self) {
        match self.active {
            ActiveEndpoint::Primary if self.fallback.is_some() && !self.fallback_tried => {
                self.active = ActiveEndpoint::Fallback;
                self.fallback_tried = true;
            }
            _ => {
                // Back to the primary; the fallback becomes eligible again
                // the next time the primary fails.
                self.active = ActiveEndpoint::Primary;
                self.fallback_tried = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_fallback_stays_on_primary() {
        let mut selector = EndpointSelector::new("a:1".into(), None);
        assert_eq!(selector.current().as_str(), "a:1");

        for _ in 0..3 {
            selector.on_failure();
            assert_eq!(selector.current().as_str(), "a:1");
            assert_eq!(selector.active(), ActiveEndpoint::Primary);
        }
    }

    #[test]
    fn primary_failure_flips_to_fallback_once_per_cycle() {
        let mut selector = EndpointSelector::new("a:1".into(), Some("b:2".into()));

        selector.on_failure();
        assert_eq!(selector.active(), ActiveEndpoint::Fallback);
        assert_eq!(selector.current().as_str(), "b:2");

        // Fallback failed too: both are retried in order, no ping-pong
        // back to the fallback until the primary fails again.
        selector.on_failure();
        assert_eq!(selector.active(), ActiveEndpoint::Primary);
        selector.on_failure();
        assert_eq!(selector.active(), ActiveEndpoint::Fallback);
        selector.on_failure();
        assert_eq!(selector.active(), ActiveEndpoint::Primary);
    }

    #[test]
    fn reset_restores_primary_and_fallback_eligibility() {
        let mut selector = EndpointSelector::new("a:1".into(), Some("b:2".into()));
        selector.on_failure();
        selector.on_failure();

        selector.reset();
        assert_eq!(selector.active(), ActiveEndpoint::Primary);
        selector.on_failure();
        assert_eq!(selector.active(), ActiveEndpoint::Fallback);
    }
}
