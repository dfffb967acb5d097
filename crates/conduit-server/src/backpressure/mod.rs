//! Per-channel circuit breakers and bounded deferred queues.

pub mod breaker;
pub mod manager;

pub use breaker::{BreakerState, CircuitBreaker, Transition};
pub use manager::{BackpressureManager, ChannelQueueStatus, PublishOutcome};
