//! Backpressure manager: breaker-gated publishing with a bounded deferred
//! queue per channel.
//!
//! The read loop never waits on a retry. A message that cannot be published
//! right now is queued for the channel's drain worker, or rejected if the
//! queue is full. Every drop is counted.
//!
//! While a channel has queued messages, new messages for it join the back
//! of the queue instead of being published directly, so one publisher's
//! messages leave in the order they arrived.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use conduit_bus::FanOutBus;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::breaker::{BreakerState, CircuitBreaker, Transition};
use crate::config::BackpressureConfig;
use crate::observability::Observer;
use crate::router::channel_topic;

/// Result of [`BackpressureManager::publish_with_backpressure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Delivered to at least one subscriber.
    Published,
    /// Deferred to the channel's drain worker.
    Queued,
    /// Dropped: the channel's queue is full.
    Rejected,
}

impl PublishOutcome {
    /// Label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Queued => "queued",
            Self::Rejected => "rejected",
        }
    }
}

/// Snapshot of one channel's backpressure state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelQueueStatus {
    /// Channel name.
    pub channel: String,
    /// Messages waiting.
    pub queued: usize,
    /// Queue capacity.
    pub capacity: usize,
    /// Breaker state.
    pub state: BreakerState,
    /// Consecutive publish failures.
    pub failure_count: u32,
}

struct QueueEntry {
    payload: String,
    attempts: u32,
    enqueued_at: Instant,
}

struct ChannelLane {
    breaker: CircuitBreaker,
    queue: Mutex<VecDeque<QueueEntry>>,
    wake: Notify,
    worker_started: AtomicBool,
}

/// Per-instance backpressure for every channel this instance publishes to.
pub struct BackpressureManager {
    bus: Arc<dyn FanOutBus>,
    config: BackpressureConfig,
    observer: Observer,
    lanes: DashMap<String, Arc<ChannelLane>>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackpressureManager {
    /// Create a manager. Drain workers stop when `cancel` fires.
    pub fn new(
        bus: Arc<dyn FanOutBus>,
        config: BackpressureConfig,
        observer: Observer,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            config,
            observer,
            lanes: DashMap::new(),
            cancel,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn lane(&self, channel: &str) -> Arc<ChannelLane> {
        if let Some(lane) = self.lanes.get(channel) {
            return Arc::clone(&lane);
        }
        let lane = self
            .lanes
            .entry(channel.to_owned())
            .or_insert_with(|| {
                Arc::new(ChannelLane {
                    breaker: CircuitBreaker::new(
                        channel,
                        self.config.failure_threshold,
                        self.config.recovery_timeout,
                    ),
                    queue: Mutex::new(VecDeque::new()),
                    wake: Notify::new(),
                    worker_started: AtomicBool::new(false),
                })
            });
        Arc::clone(&lane)
    }

    fn report(&self, channel: &str, transition: Option<Transition>) {
        if let Some(t) = transition {
            self.observer.record_circuit_transition(channel, t.from, t.to);
        }
    }

    /// Publish `payload` to `channel`'s bus topic, or defer or reject it.
    ///
    /// An open breaker means no attempt is made, and so does a non-empty
    /// queue: the message goes behind what is already waiting. A failed
    /// attempt (bus error or no subscribers) counts against the breaker and
    /// defers the message.
    pub async fn publish_with_backpressure(
        self: &Arc<Self>,
        channel: &str,
        payload: String,
    ) -> PublishOutcome {
        let lane = self.lane(channel);
        if !lane.queue.lock().is_empty() {
            let outcome = self.enqueue(channel, &lane, payload);
            self.observer.record_publish(channel, outcome);
            return outcome;
        }
        let outcome = match lane.breaker.check() {
            Err(_) => self.enqueue(channel, &lane, payload),
            Ok(transition) => {
                self.report(channel, transition);
                if self.attempt(channel, &lane, &payload).await {
                    PublishOutcome::Published
                } else {
                    self.enqueue(channel, &lane, payload)
                }
            }
        };
        self.observer.record_publish(channel, outcome);
        outcome
    }

    async fn attempt(&self, channel: &str, lane: &ChannelLane, payload: &str) -> bool {
        let delivered = match self.bus.publish(&channel_topic(channel), payload).await {
            Ok(0) => {
                debug!(channel, "publish reached no subscribers");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(channel, error = %e, "bus publish failed");
                false
            }
        };
        let transition = if delivered {
            lane.breaker.record_success()
        } else {
            lane.breaker.record_failure()
        };
        self.report(channel, transition);
        delivered
    }

    fn enqueue(self: &Arc<Self>, channel: &str, lane: &Arc<ChannelLane>, payload: String) -> PublishOutcome {
        {
            let mut queue = lane.queue.lock();
            if queue.len() >= self.config.queue_max_size {
                drop(queue);
                self.observer.record_queue_drop(channel, "queue_full");
                return PublishOutcome::Rejected;
            }
            queue.push_back(QueueEntry {
                payload,
                attempts: 0,
                enqueued_at: Instant::now(),
            });
        }
        lane.wake.notify_one();
        self.ensure_worker(channel, lane);
        PublishOutcome::Queued
    }

    fn ensure_worker(self: &Arc<Self>, channel: &str, lane: &Arc<ChannelLane>) {
        if lane.worker_started.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(channel, "starting drain worker");
        let handle = tokio::spawn(Arc::clone(self).drain(channel.to_owned(), Arc::clone(lane)));
        self.workers.lock().push(handle);
    }

    /// Re-attempt `lane`'s queue in FIFO order until cancelled.
    ///
    /// The head entry stays queued while it is being attempted, so direct
    /// publishes keep deferring behind it. Only this worker removes entries.
    async fn drain(self: Arc<Self>, channel: String, lane: Arc<ChannelLane>) {
        loop {
            if lane.queue.lock().is_empty() {
                tokio::select! {
                    () = lane.wake.notified() => continue,
                    () = self.cancel.cancelled() => return,
                }
            }

            if let Some(wait) = lane.breaker.retry_in() {
                if !self.pause(wait).await {
                    return;
                }
                continue;
            }

            let Some(payload) = lane.queue.lock().front().map(|e| e.payload.clone()) else {
                continue;
            };
            match lane.breaker.check() {
                Err(wait) => {
                    if !self.pause(wait).await {
                        return;
                    }
                    continue;
                }
                Ok(transition) => self.report(&channel, transition),
            }

            if self.attempt(&channel, &lane, &payload).await {
                if let Some(entry) = lane.queue.lock().pop_front() {
                    debug!(
                        channel,
                        attempts = entry.attempts + 1,
                        waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                        "queued message delivered"
                    );
                }
                continue;
            }

            let exhausted = {
                let mut queue = lane.queue.lock();
                match queue.front_mut() {
                    Some(entry) => {
                        entry.attempts += 1;
                        entry.attempts >= self.config.max_attempts
                            && queue.pop_front().is_some()
                    }
                    None => false,
                }
            };
            if exhausted {
                self.observer.record_queue_drop(&channel, "retries_exhausted");
            }
            if !self.pause(self.config.drain_interval).await {
                return;
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancel.cancelled() => false,
        }
    }

    /// Per-channel queue and breaker snapshot, sorted by channel.
    pub fn queue_status(&self) -> Vec<ChannelQueueStatus> {
        let mut status: Vec<_> = self
            .lanes
            .iter()
            .map(|lane| ChannelQueueStatus {
                channel: lane.key().clone(),
                queued: lane.queue.lock().len(),
                capacity: self.config.queue_max_size,
                state: lane.breaker.state(),
                failure_count: lane.breaker.failure_count(),
            })
            .collect();
        status.sort_by(|a, b| a.channel.cmp(&b.channel));
        status
    }

    /// Breaker state for `channel`; closed if never used.
    pub fn breaker_state(&self, channel: &str) -> BreakerState {
        self.lanes
            .get(channel)
            .map_or(BreakerState::Closed, |lane| lane.breaker.state())
    }

    /// Messages waiting on `channel`.
    pub fn queued(&self, channel: &str) -> usize {
        self.lanes
            .get(channel)
            .map_or(0, |lane| lane.queue.lock().len())
    }

    /// Take the drain worker handles, for joining at shutdown.
    pub fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.workers.lock())
    }
}
