//! Connection gateway: handshake, local ownership, inbound handling, reply
//! delivery, and teardown.
//!
//! Every connection has exactly one entry in the local map and, while the
//! registry is reachable, exactly one registry mirror. Teardown removes
//! both and is idempotent: only the caller that removes the local entry
//! emits the lifecycle event.

use std::collections::BTreeMap;
use std::sync::Arc;

use conduit_auth::{SessionValidator, validate_with_timeout};
use conduit_bus::{FanOutBus, Subscription};
use conduit_core::{
    ConnectionId, DisconnectReason, EvictionReason, GatewayEvent, InstanceId, MessageEnvelope,
    RejectReason,
};
use conduit_registry::{ConnectionRecord, ConnectionRegistry, RegistryError};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use crate::backpressure::{BackpressureManager, ChannelQueueStatus, PublishOutcome};
use crate::config::GatewayConfig;
use crate::eviction::{SweepReport, sweep_stale_connections};
use crate::health::DependencyHealth;
use crate::observability::{Direction, Observer};
use crate::router::{ChannelAllowList, ChannelRouter, RouteError, connection_topic};
use crate::websocket::connection::{Connection, OutboundFrame};
use crate::websocket::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::websocket::local_map::LocalConnectionMap;
use crate::websocket::rate_limit::RateLimiter;

/// Capacity of the lifecycle event channel.
const EVENT_BUFFER: usize = 1024;

/// External collaborators the gateway needs.
#[derive(Clone)]
pub struct GatewayDeps {
    /// Session authority.
    pub validator: Arc<dyn SessionValidator>,
    /// Shared pub/sub bus.
    pub bus: Arc<dyn FanOutBus>,
    /// Shared connection registry.
    pub registry: ConnectionRegistry,
}

/// A connection that passed the handshake.
pub struct Accepted {
    /// The connection.
    pub connection: Arc<Connection>,
    /// Frames for the socket writer.
    pub outbound: mpsc::Receiver<OutboundFrame>,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted")
            .field("connection_id", &self.connection.id)
            .finish_non_exhaustive()
    }
}

/// What the read loop should do after an inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Keep reading.
    Continue,
    /// Tear the connection down.
    Close(DisconnectReason),
}

/// Connection counts, cluster-wide where the registry allows.
#[derive(Clone, Debug, Serialize)]
pub struct GatewayStats {
    /// This instance.
    pub instance_id: InstanceId,
    /// Connections across all instances; `None` while the registry is down.
    pub global: Option<usize>,
    /// Connections per channel across all instances, or local counts while
    /// the registry is down.
    pub by_channel: BTreeMap<String, usize>,
    /// Connections held by this instance.
    pub local: usize,
    /// Per-channel backpressure state on this instance.
    pub queues: Vec<ChannelQueueStatus>,
}

/// Per-instance connection gateway.
pub struct ConnectionGateway {
    config: GatewayConfig,
    validator: Arc<dyn SessionValidator>,
    bus: Arc<dyn FanOutBus>,
    registry: ConnectionRegistry,
    local: Arc<LocalConnectionMap>,
    router: ChannelRouter,
    backpressure: Arc<BackpressureManager>,
    observer: Observer,
    events: broadcast::Sender<GatewayEvent>,
}

fn error_frame(message: impl std::fmt::Display) -> serde_json::Value {
    json!({ "type": "error", "message": message.to_string() })
}

impl ConnectionGateway {
    /// Create a gateway. Background drain workers stop when `shutdown`
    /// fires.
    pub fn new(config: GatewayConfig, deps: GatewayDeps, shutdown: &CancellationToken) -> Arc<Self> {
        let observer = Observer::new();
        let local = Arc::new(LocalConnectionMap::new());
        let backpressure = Arc::new(BackpressureManager::new(
            Arc::clone(&deps.bus),
            config.backpressure.clone(),
            observer.clone(),
            shutdown.child_token(),
        ));
        let router = ChannelRouter::new(
            ChannelAllowList::new(&config.allowed_channels),
            config.instance_id.clone(),
            Arc::clone(&local),
            deps.registry.clone(),
            Arc::clone(&deps.bus),
            Arc::clone(&backpressure),
        );
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            config,
            validator: deps.validator,
            bus: deps.bus,
            registry: deps.registry,
            local,
            router,
            backpressure,
            observer,
            events,
        })
    }

    /// Instance configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// This instance's ID.
    pub fn instance_id(&self) -> &InstanceId {
        &self.config.instance_id
    }

    /// Channel router.
    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Shared registry client.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Backpressure manager.
    pub fn backpressure(&self) -> &Arc<BackpressureManager> {
        &self.backpressure
    }

    /// Observability collector.
    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Locally owned connections.
    pub fn local(&self) -> &LocalConnectionMap {
        &self.local
    }

    /// Look up a local connection.
    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.local.get(id)
    }

    /// Number of local connections.
    pub fn connection_count(&self) -> usize {
        self.local.len()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    fn record_for(&self, conn: &Connection) -> ConnectionRecord {
        ConnectionRecord {
            connection_id: conn.id.clone(),
            channel: conn.channel(),
            owning_instance_id: self.config.instance_id.clone(),
            user_id: conn.identity.user_id.clone(),
            tenant_id: conn.identity.tenant_id.clone(),
            connected_at: conn.connected_at,
            last_heartbeat_at: conn.last_heartbeat_at(),
            last_activity_at: conn.last_activity_at(),
        }
    }

    /// Write (or rewrite) a connection's registry mirror.
    pub async fn register_mirror(&self, conn: &Connection) -> Result<(), RegistryError> {
        self.registry
            .register(&self.record_for(conn), self.config.max_idle_time)
            .await
    }

    /// Refuse an upgrade whose `Origin` is not on the allow-list.
    pub fn check_origin(&self, origin: Option<&str>) -> Result<(), RejectReason> {
        if self.config.origin_allowed(origin) {
            return Ok(());
        }
        debug!(origin = origin.unwrap_or("<none>"), "origin not allowed");
        self.observer.record_rejected(RejectReason::OriginNotAllowed);
        Err(RejectReason::OriginNotAllowed)
    }

    /// Validate `token` and take ownership of a new connection.
    ///
    /// A registry outage does not fail the handshake: the connection is
    /// served from the local map and the sweep writes its mirror later.
    #[instrument(skip_all, fields(connection_id))]
    pub async fn accept(self: &Arc<Self>, token: &str) -> Result<Accepted, RejectReason> {
        let Some(identity) =
            validate_with_timeout(&self.validator, token, self.config.validator_timeout).await
        else {
            self.observer.record_rejected(RejectReason::InvalidSession);
            return Err(RejectReason::InvalidSession);
        };

        let (tx, outbound) = mpsc::channel(self.config.outbound_queue_size.max(1));
        let conn = Arc::new(Connection::new(
            ConnectionId::new(),
            identity,
            self.config.default_channel.clone(),
            tx,
            RateLimiter::new(
                self.config.max_messages_per_second,
                self.config.max_messages_per_minute,
            ),
        ));
        let _ = Span::current().record("connection_id", tracing::field::display(&conn.id));

        if let Err(reason) = self.local.try_insert(
            Arc::clone(&conn),
            self.config.max_connections,
            self.config.max_connections_per_identity,
        ) {
            self.observer.record_rejected(reason);
            return Err(reason);
        }

        if let Err(e) = self.register_mirror(&conn).await {
            warn!(error = %e, "registry unavailable at accept, serving local-only");
            self.observer.record_registry_degraded("register");
        }

        let reply_topic = connection_topic(&self.config.instance_id, &conn.id);
        match self.bus.subscribe(&reply_topic).await {
            Ok(subscription) => self.spawn_reply_forwarder(&conn, subscription),
            Err(e) => warn!(error = %e, topic = %reply_topic, "reply subscription failed"),
        }
        self.spawn_heartbeat(&conn);

        let channel = conn.channel();
        self.observer.record_connection_opened(&channel);
        let _ = self.events.send(GatewayEvent::Connected {
            connection_id: conn.id.clone(),
            channel: channel.clone(),
        });

        let _ = conn.send_json(&json!({
            "type": "system",
            "message": "Connected to WebSocket Gateway",
            "connection_id": conn.id,
            "channel": channel,
            "instance_id": self.config.instance_id,
        }));
        info!(user_id = %conn.identity.user_id, channel = %channel, "connection accepted");

        Ok(Accepted {
            connection: conn,
            outbound,
        })
    }

    fn spawn_heartbeat(self: &Arc<Self>, conn: &Arc<Connection>) {
        let gateway = Arc::clone(self);
        let conn = Arc::clone(conn);
        conn.set_heartbeat_running(true);
        let _handle = tokio::spawn(async move {
            let result = run_heartbeat(
                Arc::clone(&conn),
                gateway.config.heartbeat_interval,
                gateway.config.heartbeat_timeout,
                conn.token(),
            )
            .await;
            conn.set_heartbeat_running(false);
            if result == HeartbeatResult::Failed {
                debug!(connection_id = %conn.id, "heartbeat failed");
                let _ = gateway.evict(&conn.id, EvictionReason::HeartbeatFailed).await;
            }
        });
    }

    fn spawn_reply_forwarder(self: &Arc<Self>, conn: &Arc<Connection>, mut subscription: Subscription) {
        let gateway = Arc::clone(self);
        let conn = Arc::clone(conn);
        let _handle = tokio::spawn(async move {
            // One resubscribe per loss; a replacement that ends before
            // delivering anything closes the connection.
            let mut resubscribed = false;
            loop {
                tokio::select! {
                    message = subscription.recv() => match message {
                        Some(text) => {
                            resubscribed = false;
                            gateway.deliver_local(&conn, text).await;
                        }
                        None if !conn.is_open() => break,
                        None => match gateway.replace_reply_subscription(&conn, resubscribed).await {
                            Some(fresh) => {
                                subscription = fresh;
                                resubscribed = true;
                            }
                            None => break,
                        },
                    },
                    () = conn.cancelled() => break,
                }
            }
            // Dropping the subscription unsubscribes from the reply topic.
        });
    }

    /// The bus ended an open connection's reply subscription. Subscribe
    /// again unless that was already tried; otherwise close the connection,
    /// since replies could no longer reach it.
    async fn replace_reply_subscription(
        &self,
        conn: &Connection,
        already_retried: bool,
    ) -> Option<Subscription> {
        if !already_retried {
            let topic = connection_topic(&self.config.instance_id, &conn.id);
            match self.bus.subscribe(&topic).await {
                Ok(fresh) => {
                    self.observer.record_reply_subscription_lost(true);
                    return Some(fresh);
                }
                Err(e) => warn!(connection_id = %conn.id, error = %e, "reply resubscribe failed"),
            }
        }
        self.observer.record_reply_subscription_lost(false);
        let _ = self.teardown(&conn.id, DisconnectReason::ReplyPathLost).await;
        None
    }

    /// Write a bus reply to a local connection's socket queue.
    ///
    /// A consumer that keeps the queue full past `max_dropped_messages` is
    /// evicted.
    pub async fn deliver_local(&self, conn: &Connection, text: String) {
        let started = Instant::now();
        if conn.send(Arc::new(text)) {
            self.observer.record_message(Direction::Outbound, started.elapsed());
            return;
        }
        self.observer.record_outbound_drop();
        if conn.is_open() && conn.drop_count() > self.config.max_dropped_messages {
            warn!(
                connection_id = %conn.id,
                dropped = conn.drop_count(),
                "slow consumer, evicting"
            );
            let _ = self.evict(&conn.id, EvictionReason::HeartbeatFailed).await;
        }
    }

    /// Handle one inbound text frame in arrival order.
    #[instrument(skip_all, fields(connection_id = %conn.id))]
    pub async fn handle_inbound(&self, conn: &Connection, text: &str) -> InboundOutcome {
        let started = Instant::now();
        conn.touch();

        if !conn.allow_message() {
            let _ = conn.send_json(&error_frame("Rate limit exceeded"));
            return InboundOutcome::Close(DisconnectReason::RateLimited);
        }

        let envelope = match MessageEnvelope::parse(text, &self.config.default_channel) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "invalid envelope");
                let _ = conn.send_json(&error_frame(format_args!("Invalid message format: {e}")));
                return InboundOutcome::Continue;
            }
        };

        if let Err(e) = self.router.validate_channel(&envelope.channel) {
            let _ = conn.send_json(&error_frame(e));
            return InboundOutcome::Continue;
        }

        if envelope.channel != conn.channel() {
            self.move_channel(conn, &envelope.channel).await;
        }

        match self
            .router
            .route_inbound(&conn.id, &conn.identity, &envelope)
            .await
        {
            Ok(PublishOutcome::Rejected) => {
                let _ = conn.send_json(&json!({
                    "type": "nack",
                    "reason": "queue_full",
                    "channel": envelope.channel,
                    "correlation_id": envelope.correlation_id,
                }));
            }
            Ok(_) => {}
            Err(RouteError::UnknownChannel(channel)) => {
                let _ = conn.send_json(&error_frame(format_args!("Unknown channel: {channel}")));
            }
            Err(e) => {
                warn!(error = %e, "inbound routing failed");
                let _ = conn.send_json(&error_frame("Message could not be routed"));
            }
        }

        self.observer.record_message(Direction::Inbound, started.elapsed());
        InboundOutcome::Continue
    }

    async fn move_channel(&self, conn: &Connection, to: &str) {
        let from = conn.set_channel(to);
        debug!(connection_id = %conn.id, from = %from, to, "connection moved channel");
        if let Err(e) = self
            .registry
            .move_channel(&conn.id, &from, to, self.config.max_idle_time)
            .await
        {
            warn!(error = %e, "registry channel move failed");
            self.observer.record_registry_degraded("move_channel");
        }
    }

    /// Record an answered heartbeat locally and refresh the registry TTL.
    pub async fn record_heartbeat(&self, conn: &Connection) {
        conn.mark_heartbeat();
        match self
            .registry
            .record_heartbeat(
                &conn.id,
                conn.last_heartbeat_at(),
                conn.last_activity_at(),
                self.config.max_idle_time,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(connection_id = %conn.id, "registry mirror missing on heartbeat"),
            Err(e) => {
                warn!(error = %e, "registry heartbeat refresh failed");
                self.observer.record_registry_degraded("record_heartbeat");
            }
        }
    }

    /// Tear a connection down: cancel its tasks, remove the local entry and
    /// the registry mirror, and emit one lifecycle event.
    ///
    /// Returns `false` (and does nothing) if the connection was already
    /// gone.
    #[instrument(skip_all, fields(connection_id = %id, reason = reason.as_str()))]
    pub async fn teardown(&self, id: &ConnectionId, reason: DisconnectReason) -> bool {
        let Some(conn) = self.local.remove(id) else {
            return false;
        };
        let _ = conn.begin_close(reason.close_code());

        if let Err(e) = self.registry.unregister(id).await {
            warn!(error = %e, "registry unregister failed");
            self.observer.record_registry_degraded("unregister");
        }
        conn.mark_closed();

        self.observer.record_connection_closed(reason, conn.age());
        let event = match reason {
            DisconnectReason::Evicted(why) => {
                self.observer.record_eviction(why);
                info!(reason = why.as_str(), "connection evicted");
                GatewayEvent::Evicted {
                    connection_id: id.clone(),
                    reason: why,
                }
            }
            other => {
                info!(reason = other.as_str(), "connection closed");
                GatewayEvent::Disconnected {
                    connection_id: id.clone(),
                    reason: other,
                }
            }
        };
        let _ = self.events.send(event);
        true
    }

    /// Evict a connection. Evicting an absent connection is a no-op.
    pub async fn evict(&self, id: &ConnectionId, reason: EvictionReason) -> bool {
        self.teardown(id, DisconnectReason::Evicted(reason)).await
    }

    /// Run one eviction sweep now.
    pub async fn sweep(&self) -> SweepReport {
        sweep_stale_connections(self).await
    }

    /// Close every local connection for shutdown.
    pub async fn shutdown_all(&self) -> usize {
        let mut closed = 0;
        for conn in self.local.snapshot() {
            if self.teardown(&conn.id, DisconnectReason::ShuttingDown).await {
                closed += 1;
            }
        }
        closed
    }

    /// Connection counts and queue status.
    pub async fn stats(&self) -> GatewayStats {
        let local = self.local.len();
        let (global, by_channel) = match self.registry.count_by_channel().await {
            Ok(by_channel) => (Some(by_channel.values().sum()), by_channel),
            Err(e) => {
                warn!(error = %e, "registry unavailable for stats, reporting local counts");
                self.observer.record_registry_degraded("stats");
                (None, self.local.count_by_channel())
            }
        };
        GatewayStats {
            instance_id: self.config.instance_id.clone(),
            global,
            by_channel,
            local,
            queues: self.backpressure.queue_status(),
        }
    }

    /// Check every external dependency concurrently.
    pub async fn dependency_health(&self) -> DependencyHealth {
        let (bus, registry, validator) = tokio::join!(
            self.bus.health_check(),
            self.registry.is_healthy(),
            self.validator.health_check(),
        );
        DependencyHealth {
            bus,
            registry,
            validator,
        }
    }
}
