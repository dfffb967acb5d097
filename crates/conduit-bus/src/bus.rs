//! The fan-out bus seam and its subscription handle.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered messages per subscription before the bus starts dropping.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Bus failures. Every variant is recoverable; callers count it as a
/// publish failure and retry through their own queue.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus backend could not be reached.
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    /// A bus call exceeded its deadline.
    #[error("bus operation timed out")]
    Timeout,
    /// Redis reported an error.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Shared publish/subscribe medium.
#[async_trait]
pub trait FanOutBus: Send + Sync {
    /// Publish `payload` on `topic`. Returns how many subscribers received it.
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BusError>;

    /// Subscribe to `topic`. Messages arrive on the returned subscription
    /// until it is dropped.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;

    /// Current number of subscribers on `topic` across all instances.
    async fn subscriber_count(&self, topic: &str) -> Result<usize, BusError>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> bool;
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<String>,
    _guard: Box<dyn Send + Sync>,
}

impl Subscription {
    /// Wrap a receiver with a guard whose `Drop` tears the subscription down.
    pub fn new(
        topic: impl Into<String>,
        rx: mpsc::Receiver<String>,
        guard: impl Send + Sync + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            rx,
            _guard: Box::new(guard),
        }
    }

    /// The subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the bus side has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
