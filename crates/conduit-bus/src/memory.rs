//! In-process bus for single-instance deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{BusError, FanOutBus, SUBSCRIPTION_BUFFER, Subscription};

type Topics = Mutex<HashMap<String, Vec<(u64, mpsc::Sender<String>)>>>;

/// Fan-out bus living inside the process.
///
/// Delivery is best-effort: a subscriber whose buffer is full misses the
/// message and is not counted as a receiver.
#[derive(Default)]
pub struct MemoryBus {
    topics: Arc<Topics>,
    next_id: AtomicU64,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }
}

struct Unsubscribe {
    topics: Weak<Topics>,
    topic: String,
    id: u64,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        let mut topics = topics.lock();
        if let Some(subs) = topics.get_mut(&self.topic) {
            subs.retain(|(id, _)| *id != self.id);
            if subs.is_empty() {
                let _ = topics.remove(&self.topic);
            }
        }
    }
}

#[async_trait]
impl FanOutBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BusError> {
        let senders: Vec<mpsc::Sender<String>> = self
            .topics
            .lock()
            .get(topic)
            .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default();

        let delivered = senders
            .iter()
            .filter(|tx| tx.try_send(payload.to_owned()).is_ok())
            .count();
        if delivered < senders.len() {
            debug!(topic, dropped = senders.len() - delivered, "subscriber buffer full");
        }
        Ok(delivered)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push((id, tx));

        let guard = Unsubscribe {
            topics: Arc::downgrade(&self.topics),
            topic: topic.to_owned(),
            id,
        };
        Ok(Subscription::new(topic, rx, guard))
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize, BusError> {
        Ok(self.topics.lock().get(topic).map_or(0, Vec::len))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
