//! Channel router: envelope channels to bus topics, connection IDs to the
//! owning instance's reply topic.

use std::collections::HashSet;
use std::sync::Arc;

use conduit_bus::{BusError, FanOutBus};
use conduit_core::{ConnectionId, Identity, InstanceId, MessageEnvelope};
use conduit_registry::{ConnectionRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::backpressure::{BackpressureManager, PublishOutcome};
use crate::websocket::local_map::LocalConnectionMap;

/// Bus topic carrying a logical channel's messages.
pub fn channel_topic(channel: &str) -> String {
    format!("channel:{channel}")
}

/// Bus topic carrying replies for one connection on its owning instance.
pub fn connection_topic(instance: &InstanceId, connection: &ConnectionId) -> String {
    format!("instance:{instance}:conn:{connection}")
}

/// Routing failures.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The channel is not on the allowed list.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    /// Neither this instance nor the registry knows the connection.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    /// The registry could not be asked.
    #[error(transparent)]
    Registry(RegistryError),
    /// The bus refused the publish.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What consumers receive on a channel topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Where replies should be routed.
    pub connection_id: ConnectionId,
    /// Instance that owns the connection.
    pub instance_id: InstanceId,
    /// Sender's claims.
    pub identity: Identity,
    /// The client's envelope, unchanged.
    pub envelope: MessageEnvelope,
}

/// Static allow-list of channel names. Entries ending in `*` match by
/// prefix.
#[derive(Clone, Debug, Default)]
pub struct ChannelAllowList {
    exact: HashSet<String>,
    prefixes: Vec<String>,
}

impl ChannelAllowList {
    /// Build from configured entries.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref();
            match entry.strip_suffix('*') {
                Some(prefix) => list.prefixes.push(prefix.to_owned()),
                None => {
                    let _ = list.exact.insert(entry.to_owned());
                }
            }
        }
        list
    }

    /// Whether clients may address `channel`.
    pub fn is_allowed(&self, channel: &str) -> bool {
        !channel.is_empty()
            && (self.exact.contains(channel)
                || self.prefixes.iter().any(|p| channel.starts_with(p.as_str())))
    }
}

/// Stateless routing over the bus, the registry, and the local map.
pub struct ChannelRouter {
    allowed: ChannelAllowList,
    instance_id: InstanceId,
    local: Arc<LocalConnectionMap>,
    registry: ConnectionRegistry,
    bus: Arc<dyn FanOutBus>,
    backpressure: Arc<BackpressureManager>,
}

impl ChannelRouter {
    /// Create a router for `instance_id`.
    pub fn new(
        allowed: ChannelAllowList,
        instance_id: InstanceId,
        local: Arc<LocalConnectionMap>,
        registry: ConnectionRegistry,
        bus: Arc<dyn FanOutBus>,
        backpressure: Arc<BackpressureManager>,
    ) -> Self {
        Self {
            allowed,
            instance_id,
            local,
            registry,
            bus,
            backpressure,
        }
    }

    /// Reject channels not on the allowed list.
    pub fn validate_channel(&self, channel: &str) -> Result<(), RouteError> {
        if self.allowed.is_allowed(channel) {
            Ok(())
        } else {
            Err(RouteError::UnknownChannel(channel.to_owned()))
        }
    }

    /// Publish a client envelope to its channel topic, through backpressure.
    pub async fn route_inbound(
        &self,
        connection_id: &ConnectionId,
        identity: &Identity,
        envelope: &MessageEnvelope,
    ) -> Result<PublishOutcome, RouteError> {
        self.validate_channel(&envelope.channel)?;
        let message = InboundMessage {
            connection_id: connection_id.clone(),
            instance_id: self.instance_id.clone(),
            identity: identity.clone(),
            envelope: envelope.clone(),
        };
        let payload = serde_json::to_string(&message)?;
        Ok(self
            .backpressure
            .publish_with_backpressure(&envelope.channel, payload)
            .await)
    }

    /// Publish `message` to the reply topic of `connection_id`'s owner.
    ///
    /// Returns how many subscribers received it.
    pub async fn route_outbound(
        &self,
        connection_id: &ConnectionId,
        message: &str,
    ) -> Result<usize, RouteError> {
        let owner = if self.local.contains(connection_id) {
            self.instance_id.clone()
        } else {
            match self.registry.get(connection_id).await {
                Ok(record) => record.owning_instance_id,
                Err(RegistryError::NotFound(_)) => {
                    return Err(RouteError::UnknownConnection(connection_id.clone()));
                }
                Err(e) => return Err(RouteError::Registry(e)),
            }
        };
        let topic = connection_topic(&owner, connection_id);
        debug!(connection_id = %connection_id, topic = %topic, "routing outbound message");
        Ok(self.bus.publish(&topic, message).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackpressureConfig;
    use crate::observability::Observer;
    use crate::websocket::connection::Connection;
    use crate::websocket::rate_limit::RateLimiter;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use conduit_bus::MemoryBus;
    use conduit_registry::{ConnectionRecord, MemoryStore};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        router: ChannelRouter,
        bus: Arc<MemoryBus>,
        local: Arc<LocalConnectionMap>,
        registry: ConnectionRegistry,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        let local = Arc::new(LocalConnectionMap::new());
        let registry = ConnectionRegistry::new(
            Arc::new(MemoryStore::new()),
            "test:",
            Duration::from_secs(300),
        );
        let backpressure = Arc::new(BackpressureManager::new(
            bus.clone(),
            BackpressureConfig::default(),
            Observer::new(),
            CancellationToken::new(),
        ));
        let router = ChannelRouter::new(
            ChannelAllowList::new(["guide", "pillar:*"]),
            InstanceId::from("gw_local"),
            Arc::clone(&local),
            registry.clone(),
            bus.clone(),
            backpressure,
        );
        Fixture {
            router,
            bus,
            local,
            registry,
        }
    }

    #[test]
    fn topic_formats() {
        assert_eq!(channel_topic("guide"), "channel:guide");
        assert_eq!(
            connection_topic(&InstanceId::from("gw_a"), &ConnectionId::from("conn_1")),
            "instance:gw_a:conn:conn_1"
        );
    }

    #[test]
    fn allow_list_exact_and_prefix() {
        let list = ChannelAllowList::new(["guide", "pillar:*"]);
        assert!(list.is_allowed("guide"));
        assert!(list.is_allowed("pillar:content"));
        assert!(!list.is_allowed("guides"));
        assert!(!list.is_allowed("admin"));
        assert!(!list.is_allowed(""));
    }

    #[tokio::test]
    async fn inbound_wraps_envelope_for_consumers() {
        let f = fixture();
        let mut sub = f.bus.subscribe("channel:guide").await.unwrap();
        let envelope = MessageEnvelope::new("guide", "ask").with_correlation_id("c1");

        let outcome = f
            .router
            .route_inbound(&ConnectionId::from("conn_1"), &Identity::user("alice"), &envelope)
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Published);

        let raw = sub.recv().await.unwrap();
        let msg: InboundMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg.connection_id.as_str(), "conn_1");
        assert_eq!(msg.instance_id.as_str(), "gw_local");
        assert_eq!(msg.identity.user_id, "alice");
        assert_eq!(msg.envelope, envelope);
    }

    #[tokio::test]
    async fn inbound_unknown_channel_rejected() {
        let f = fixture();
        let envelope = MessageEnvelope::new("admin", "ask");
        let err = f
            .router
            .route_inbound(&ConnectionId::from("conn_1"), &Identity::user("a"), &envelope)
            .await
            .unwrap_err();
        assert_matches!(err, RouteError::UnknownChannel(c) if c == "admin");
    }

    #[tokio::test]
    async fn outbound_to_local_connection() {
        let f = fixture();
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(Connection::new(
            ConnectionId::from("conn_1"),
            Identity::user("alice"),
            "guide",
            tx,
            RateLimiter::new(10, 100),
        ));
        f.local.try_insert(conn, 10, 5).unwrap();
        let mut sub = f.bus.subscribe("instance:gw_local:conn:conn_1").await.unwrap();

        let n = f
            .router
            .route_outbound(&ConnectionId::from("conn_1"), "reply")
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(sub.recv().await.as_deref(), Some("reply"));
    }

    #[tokio::test]
    async fn outbound_to_remote_connection_uses_registry() {
        let f = fixture();
        let now = Utc::now();
        f.registry
            .register(
                &ConnectionRecord {
                    connection_id: ConnectionId::from("conn_9"),
                    channel: "guide".into(),
                    owning_instance_id: InstanceId::from("gw_remote"),
                    user_id: "bob".into(),
                    tenant_id: None,
                    connected_at: now,
                    last_heartbeat_at: now,
                    last_activity_at: now,
                },
                Duration::from_secs(300),
            )
            .await
            .unwrap();
        let mut sub = f.bus.subscribe("instance:gw_remote:conn:conn_9").await.unwrap();

        let _ = f
            .router
            .route_outbound(&ConnectionId::from("conn_9"), "reply")
            .await
            .unwrap();
        assert_eq!(sub.recv().await.as_deref(), Some("reply"));
    }

    #[tokio::test]
    async fn outbound_to_unknown_connection() {
        let f = fixture();
        let err = f
            .router
            .route_outbound(&ConnectionId::from("conn_x"), "reply")
            .await
            .unwrap_err();
        assert_matches!(err, RouteError::UnknownConnection(_));
    }
}
