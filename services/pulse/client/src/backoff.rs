//! Retry delay computation for reconnect attempts.

use std::time::Duration;

/// Default base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5000);
/// Default backoff multiplier applied per attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Default upper bound on the retry delay.
pub const DEFAULT_CAP: Duration = Duration::from_millis(60_000);

/// Deterministic, bounded exponential backoff.
///
/// `delay(n) = min(base * multiplier^(n-1), cap)` for attempt `n >= 1`.
/// Jitter is available but off by default; the stock reconnect behavior
/// is fully deterministic given the attempt count.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
    cap: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    /// Create a policy without jitter.
    pub fn new(base: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            base,
            multiplier,
            cap,
            jitter: 0.0,
        }
    }

    /// Enable symmetric jitter with the given factor (clamped to 0.0..=1.0).
    ///
    /// A factor of 0.2 spreads each delay by up to ±20%.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait before attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let scaled = self.base.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1);
        let capped = scaled.min(self.cap.as_millis() as f64);

        let millis = if self.jitter > 0.0 {
            let spread = rand::random::<f64>() * 2.0 - 1.0;
            (capped * (1.0 + spread * self.jitter)).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(millis as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MULTIPLIER, DEFAULT_CAP)
    }
}
