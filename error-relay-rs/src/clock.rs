//! Wall-clock time derived from the tokio monotonic clock.
//!
//! Packet timestamps and the delivery cursor are compared against each other
//! and against `tokio::time::sleep`, so they must all advance on one clock.
//! Anchoring `Utc::now()` to a `tokio::time::Instant` keeps them consistent,
//! including under a paused test runtime.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor_instant: Instant::now(),
        }
    }

    /// Current time as seen by the relay
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant);
        match chrono::Duration::from_std(elapsed) {
            Ok(elapsed) => self.anchor_wall + elapsed,
            Err(_) => Utc::now(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
