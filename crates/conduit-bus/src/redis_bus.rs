//! Redis pub/sub bus for multi-instance deployments.
//!
//! Nothing connects until first use, so a Redis outage at boot shows up in
//! health checks instead of failing startup. Publishing goes through a
//! shared `ConnectionManager`, which reconnects on its own.
//!
//! Every subscription shares one pub/sub connection owned by a hub task.
//! The hub subscribes a topic on its first local subscriber and
//! unsubscribes it after the last one drops. When the pub/sub connection
//! is lost, every open subscription ends (`recv` returns `None`) and the
//! next subscribe reconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, PubSub};
use tokio::sync::{OnceCell, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::{BusError, FanOutBus, SUBSCRIPTION_BUFFER, Subscription};

/// Default deadline for a single Redis round trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Fan-out bus backed by Redis `PUBLISH`/`SUBSCRIBE`.
pub struct RedisBus {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    hub: OnceCell<mpsc::UnboundedSender<HubCommand>>,
    next_id: AtomicU64,
    timeout: Duration,
}

enum HubCommand {
    Subscribe {
        topic: String,
        id: u64,
        tx: mpsc::Sender<String>,
        ack: oneshot::Sender<Result<(), BusError>>,
    },
    Unsubscribe {
        topic: String,
        id: u64,
    },
}

enum HubEvent {
    Command(Option<HubCommand>),
    Message(Option<redis::Msg>),
}

type Routes = HashMap<String, Vec<(u64, mpsc::Sender<String>)>>;

/// Subscription guard: tells the hub to drop this route.
struct HubRoute {
    hub: mpsc::UnboundedSender<HubCommand>,
    topic: String,
    id: u64,
}

impl Drop for HubRoute {
    fn drop(&mut self) {
        let _ = self.hub.send(HubCommand::Unsubscribe {
            topic: std::mem::take(&mut self.topic),
            id: self.id,
        });
    }
}

async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = redis::RedisResult<T>> + Send,
) -> Result<T, BusError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| BusError::Timeout)?
        .map_err(BusError::from)
}

impl RedisBus {
    /// Open a client for `url`. Only the URL is checked here; the first
    /// operation connects.
    pub fn open(url: &str) -> Result<Self, BusError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: OnceCell::new(),
            hub: OnceCell::new(),
            next_id: AtomicU64::new(0),
            timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Override the per-operation deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager, BusError> {
        self.connection
            .get_or_try_init(|| bounded(self.timeout, ConnectionManager::new(self.client.clone())))
            .await
            .cloned()
    }

    async fn hub(&self) -> &mpsc::UnboundedSender<HubCommand> {
        self.hub
            .get_or_init(|| async {
                let (tx, rx) = mpsc::unbounded_channel();
                let _handle = tokio::spawn(run_hub(self.client.clone(), self.timeout, rx));
                tx
            })
            .await
    }
}

#[async_trait]
impl FanOutBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BusError> {
        let mut conn = self.connection().await?;
        bounded(self.timeout, async move { conn.publish(topic, payload).await }).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let hub = self.hub().await.clone();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (ack, acked) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stopped = || BusError::Unavailable("subscription hub stopped".into());

        hub.send(HubCommand::Subscribe {
            topic: topic.to_owned(),
            id,
            tx,
            ack,
        })
        .map_err(|_| stopped())?;
        acked.await.map_err(|_| stopped())??;

        let guard = HubRoute {
            hub,
            topic: topic.to_owned(),
            id,
        };
        Ok(Subscription::new(topic, rx, guard))
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize, BusError> {
        let mut conn = self.connection().await?;
        let reply: Vec<(String, usize)> = bounded(self.timeout, async move {
            redis::cmd("PUBSUB")
                .arg("NUMSUB")
                .arg(topic)
                .query_async(&mut conn)
                .await
        })
        .await?;
        Ok(reply.first().map_or(0, |(_, n)| *n))
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        let pong: Result<String, BusError> = bounded(self.timeout, async move {
            redis::cmd("PING").query_async(&mut conn).await
        })
        .await;
        pong.is_ok()
    }
}

async fn next_message(pubsub: &mut PubSub) -> Option<redis::Msg> {
    let mut messages = std::pin::pin!(pubsub.on_message());
    messages.next().await
}

/// Own the shared pub/sub connection until the bus is dropped.
async fn run_hub(
    client: redis::Client,
    timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<HubCommand>,
) {
    let mut pubsub: Option<PubSub> = None;
    let mut routes = Routes::new();

    loop {
        let event = match pubsub.as_mut() {
            Some(conn) => tokio::select! {
                command = commands.recv() => HubEvent::Command(command),
                message = next_message(conn) => HubEvent::Message(message),
            },
            None => HubEvent::Command(commands.recv().await),
        };

        match event {
            HubEvent::Command(None) => break,
            HubEvent::Command(Some(HubCommand::Subscribe {
                topic,
                id,
                tx,
                ack,
            })) => {
                let result = add_route(&client, timeout, &mut pubsub, &mut routes, topic, id, tx).await;
                if result.is_err() {
                    // The connection state is unknown; start over.
                    pubsub = None;
                    routes.clear();
                }
                let _ = ack.send(result);
            }
            HubEvent::Command(Some(HubCommand::Unsubscribe { topic, id })) => {
                remove_route(timeout, pubsub.as_mut(), &mut routes, &topic, id).await;
            }
            HubEvent::Message(Some(message)) => dispatch(&routes, &message),
            HubEvent::Message(None) => {
                warn!(topics = routes.len(), "redis pub/sub connection lost");
                pubsub = None;
                // Dropping the senders ends every open subscription.
                routes.clear();
            }
        }
    }
    debug!("redis subscription hub stopped");
}

async fn add_route(
    client: &redis::Client,
    timeout: Duration,
    pubsub: &mut Option<PubSub>,
    routes: &mut Routes,
    topic: String,
    id: u64,
    tx: mpsc::Sender<String>,
) -> Result<(), BusError> {
    if pubsub.is_none() {
        *pubsub = Some(bounded(timeout, client.get_async_pubsub()).await?);
        info!("redis pub/sub connection established");
    }
    if !routes.contains_key(&topic)
        && let Some(conn) = pubsub.as_mut()
    {
        bounded(timeout, conn.subscribe(&topic)).await?;
    }
    routes.entry(topic).or_default().push((id, tx));
    Ok(())
}

async fn remove_route(
    timeout: Duration,
    pubsub: Option<&mut PubSub>,
    routes: &mut Routes,
    topic: &str,
    id: u64,
) {
    let Some(subs) = routes.get_mut(topic) else {
        return;
    };
    subs.retain(|(sub_id, _)| *sub_id != id);
    if !subs.is_empty() {
        return;
    }
    let _ = routes.remove(topic);
    if let Some(conn) = pubsub
        && let Err(e) = bounded(timeout, conn.unsubscribe(topic)).await
    {
        debug!(topic, error = %e, "redis unsubscribe failed");
    }
}

fn dispatch(routes: &Routes, message: &redis::Msg) {
    let topic = message.get_channel_name();
    let Some(subs) = routes.get(topic) else {
        return;
    };
    let payload = match message.get_payload::<String>() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(topic, error = %e, "non-UTF-8 bus payload dropped");
            return;
        }
    };
    for (_, tx) in subs {
        if tx.try_send(payload.clone()).is_err() {
            debug!(topic, "subscriber buffer full or closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens on port 1.
    const UNREACHABLE: &str = "redis://127.0.0.1:1";

    #[test]
    fn open_rejects_bad_url() {
        assert!(RedisBus::open("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_server_degrades() {
        let bus = RedisBus::open(UNREACHABLE)
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        assert!(!bus.health_check().await);
        assert!(bus.publish("t", "m").await.is_err());
        assert!(bus.subscribe("t").await.is_err());
        // The hub survives a failed connect and reports again.
        assert!(bus.subscribe("t").await.is_err());
    }
}
