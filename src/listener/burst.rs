//! Client-side collapsing of rapid repeat notifications.
//!
//! Devices tend to send the same event several times in quick succession.
//! Only datagrams that pass the window move it forward; identity is not
//! known yet at this point, so a foreign device's packet can also open it.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BurstFilter {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl BurstFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` when the datagram arriving at `now` should be processed.
    pub fn admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}
