//! Fixed-interval request throttle
//!
//! Not a token bucket: the limiter only remembers when the previous request
//! finished and makes the next one wait out the rest of the interval. The
//! round trip itself counts against the interval, so the achieved rate stays
//! at or below one request per interval.

use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// A zero interval disables throttling
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Time left before the next request may be dispatched
    pub fn remaining(&self) -> Duration {
        match self.last {
            Some(last) => self.interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Sleep until the next request is allowed
    pub async fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            trace!(wait_ms = remaining.as_millis() as u64, "Throttling before next request");
            tokio::time::sleep(remaining).await;
        }
    }

    /// Restart the interval; call once the response has been received
    pub fn record(&mut self) {
        self.last = Some(Instant::now());
    }
}
