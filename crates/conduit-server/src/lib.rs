//! # conduit-server
//!
//! Axum HTTP + `WebSocket` gateway for one conduit instance.
//!
//! - Connection lifecycle: token handshake, local map, registry mirror, teardown
//! - Channel routing over the fan-out bus, with per-connection reply topics
//! - Per-channel circuit breakers and bounded deferred queues
//! - Heartbeats and a periodic eviction sweep
//! - HTTP endpoints: `/ws`, `/health`, `/metrics`, `/stats`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod backpressure;
pub mod config;
pub mod eviction;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod observability;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{BackpressureConfig, GatewayConfig};
pub use gateway::{Accepted, ConnectionGateway, GatewayDeps, GatewayStats, InboundOutcome};
pub use router::{ChannelRouter, InboundMessage, RouteError, channel_topic, connection_topic};
pub use server::GatewayServer;
