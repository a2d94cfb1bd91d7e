use std::time::Instant;

// Source of "now" for rate limiting and cache expiry
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
