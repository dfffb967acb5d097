//! Sliding-window inbound rate limit.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Per-connection message budget over the last second and last minute.
#[derive(Debug)]
pub struct RateLimiter {
    per_second: usize,
    per_minute: usize,
    stamps: VecDeque<Instant>,
}

impl RateLimiter {
    /// A limiter admitting `per_second` and `per_minute` messages.
    pub fn new(per_second: usize, per_minute: usize) -> Self {
        Self {
            per_second,
            per_minute,
            stamps: VecDeque::new(),
        }
    }

    /// Admit one message now, or refuse it. Refused messages use no budget.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        while self
            .stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= MINUTE)
        {
            let _ = self.stamps.pop_front();
        }
        if self.stamps.len() >= self.per_minute {
            return false;
        }
        let last_second = self
            .stamps
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) < SECOND)
            .count();
        if last_second >= self.per_second {
            return false;
        }
        self.stamps.push_back(now);
        true
    }
}
