use std::collections::VecDeque;
use std::time::{Duration, Instant};

// Sliding window limiter - one timestamp per request that reached the network
pub struct RateLimiter {
    history: VecDeque<Instant>, // front = oldest
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            history: VecDeque::new(),
            max_requests: max_requests.max(1),
            window,
        }
    }

    // Drop everything older than the window
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.history.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admission check. Prunes first, then returns how long the caller has to
    /// wait if the window is full.
    pub fn check(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);

        if self.history.len() < self.max_requests {
            return Ok(());
        }

        let wait = self
            .history
            .front()
            .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
            .unwrap_or_default();
        Err(wait)
    }

    pub fn record(&mut self, now: Instant) {
        self.history.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
