//! Per-channel circuit breaker.
//!
//! CLOSED → (failures ≥ threshold) → OPEN → (recovery elapsed, next attempt)
//! → HALF_OPEN → success → CLOSED, or failure → OPEN. There is no terminal
//! state.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

/// Externally visible breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Publishes are attempted.
    Closed,
    /// Publishes are not attempted until recovery is due.
    Open,
    /// One trial window after recovery; the next outcome decides.
    HalfOpen,
}

impl BreakerState {
    /// Label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// A state change, reported to the observability collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before.
    pub from: BreakerState,
    /// State after.
    pub to: BreakerState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

impl CircuitState {
    fn public(self) -> BreakerState {
        match self {
            Self::Closed => BreakerState::Closed,
            Self::Open { .. } => BreakerState::Open,
            Self::HalfOpen => BreakerState::HalfOpen,
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Failure-tracking state machine for one (instance, channel) pair.
pub struct CircuitBreaker {
    channel: String,
    threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// A closed breaker.
    pub fn new(channel: impl Into<String>, threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            channel: channel.into(),
            threshold: threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    /// Gate one publish attempt.
    ///
    /// `Ok` admits the attempt, carrying the OPEN → HALF_OPEN transition if
    /// this call made it. `Err` carries the time left until recovery.
    pub fn check(&self) -> Result<Option<Transition>, Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(None),
            CircuitState::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!(channel = %self.channel, "circuit breaker half-open, probing");
                    Ok(Some(Transition {
                        from: BreakerState::Open,
                        to: BreakerState::HalfOpen,
                    }))
                } else {
                    Err(self.recovery_timeout - elapsed)
                }
            }
        }
    }

    /// A publish succeeded: reset failures and close.
    pub fn record_success(&self) -> Option<Transition> {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        let from = inner.state.public();
        if from == BreakerState::Closed {
            return None;
        }
        inner.state = CircuitState::Closed;
        info!(channel = %self.channel, "circuit breaker closed after successful publish");
        Some(Transition {
            from,
            to: BreakerState::Closed,
        })
    }

    /// A publish failed: count it and open if the threshold is reached, or
    /// immediately when probing.
    pub fn record_failure(&self) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);
        let from = inner.state.public();
        let trip = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open { .. } => false,
        };
        if !trip {
            return None;
        }
        warn!(
            channel = %self.channel,
            failures = inner.failure_count,
            recovery_secs = self.recovery_timeout.as_secs(),
            "circuit breaker opened"
        );
        inner.state = CircuitState::Open { since: now };
        Some(Transition {
            from,
            to: BreakerState::Open,
        })
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state.public()
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// When the most recent failure was recorded.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.inner.lock().last_failure_at
    }

    /// Time until an open breaker admits a trial attempt; `None` unless open and
    /// still cooling down.
    pub fn retry_in(&self) -> Option<Duration> {
        match self.inner.lock().state {
            CircuitState::Open { since } => {
                let elapsed = since.elapsed();
                (elapsed < self.recovery_timeout).then(|| self.recovery_timeout - elapsed)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("guide", 5, Duration::from_secs(30))
    }

    #[test]
    fn starts_closed() {
        let b = breaker();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.check(), Ok(None));
        assert!(b.retry_in().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold() {
        let b = breaker();
        for _ in 0..4 {
            assert_eq!(b.record_failure(), None);
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(
            b.record_failure(),
            Some(Transition {
                from: BreakerState::Closed,
                to: BreakerState::Open
            })
        );
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.check(), Err(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_recovery_on_next_attempt() {
        let b = breaker();
        for _ in 0..5 {
            let _ = b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(b.check().is_err());
        assert_eq!(b.retry_in(), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        // Still reported open until something attempts.
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(
            b.check(),
            Ok(Some(Transition {
                from: BreakerState::Open,
                to: BreakerState::HalfOpen
            }))
        );
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_and_resets() {
        let b = breaker();
        for _ in 0..5 {
            let _ = b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = b.check();
        assert_eq!(
            b.record_success(),
            Some(Transition {
                from: BreakerState::HalfOpen,
                to: BreakerState::Closed
            })
        );
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let b = breaker();
        for _ in 0..5 {
            let _ = b.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = b.check();
        assert_eq!(
            b.record_failure(),
            Some(Transition {
                from: BreakerState::HalfOpen,
                to: BreakerState::Open
            })
        );
        assert_eq!(b.retry_in(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn success_in_closed_resets_count_without_transition() {
        let b = breaker();
        let _ = b.record_failure();
        let _ = b.record_failure();
        assert_eq!(b.record_success(), None);
        assert_eq!(b.failure_count(), 0);
        assert!(b.last_failure_at().is_some());
    }

    #[test]
    fn zero_threshold_treated_as_one() {
        let b = CircuitBreaker::new("guide", 0, Duration::from_secs(1));
        assert!(b.record_failure().is_some());
    }

    #[test]
    fn state_labels() {
        assert_eq!(BreakerState::Closed.as_str(), "closed");
        assert_eq!(BreakerState::Open.as_str(), "open");
        assert_eq!(BreakerState::HalfOpen.as_str(), "half_open");
    }
}
