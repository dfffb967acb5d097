//! Periodic stale-connection sweep.
//!
//! Three checks per local connection:
//! - heartbeat silence longer than `max_idle_time` evicts with `idle_timeout`;
//! - an open connection with no heartbeat task evicts with `no_heartbeat`;
//! - a connection missing from the registry gets its mirror rewritten.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::EvictionReason;
use conduit_registry::RegistryError;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::gateway::ConnectionGateway;
use crate::websocket::connection::Connection;

/// What one sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Connections examined.
    pub scanned: usize,
    /// Evicted for heartbeat silence.
    pub evicted_idle: usize,
    /// Evicted because nothing was monitoring them.
    pub evicted_no_heartbeat: usize,
    /// Registry mirrors rewritten.
    pub reconciled: usize,
}

impl SweepReport {
    /// Total evictions.
    pub fn evicted(&self) -> usize {
        self.evicted_idle + self.evicted_no_heartbeat
    }
}

/// Sweep this instance's connections once.
#[instrument(skip_all, fields(instance_id = %gateway.instance_id()))]
pub async fn sweep_stale_connections(gateway: &ConnectionGateway) -> SweepReport {
    let max_idle = gateway.config().max_idle_time;
    let mut report = SweepReport::default();

    for conn in gateway.local().snapshot() {
        report.scanned += 1;
        if !conn.is_open() {
            continue;
        }

        if conn.heartbeat_elapsed() > max_idle {
            debug!(connection_id = %conn.id, idle_secs = conn.heartbeat_elapsed().as_secs(), "idle connection");
            if gateway.evict(&conn.id, EvictionReason::IdleTimeout).await {
                report.evicted_idle += 1;
            }
            continue;
        }

        if !conn.heartbeat_running() {
            if gateway.evict(&conn.id, EvictionReason::NoHeartbeat).await {
                report.evicted_no_heartbeat += 1;
            }
            continue;
        }

        match gateway.registry().get(&conn.id).await {
            Ok(_) => {}
            Err(RegistryError::NotFound(_)) => match reconcile_mirror(gateway, &conn).await {
                Ok(true) => report.reconciled += 1,
                Ok(false) => {}
                Err(e) => warn!(connection_id = %conn.id, error = %e, "registry reconcile failed"),
            },
            Err(e) => {
                warn!(error = %e, "registry unavailable during sweep");
                gateway.observer().record_registry_degraded("sweep");
            }
        }
    }

    if report.evicted() > 0 || report.reconciled > 0 {
        info!(
            scanned = report.scanned,
            evicted_idle = report.evicted_idle,
            evicted_no_heartbeat = report.evicted_no_heartbeat,
            reconciled = report.reconciled,
            "eviction sweep"
        );
    }
    report
}

/// Rewrite a missing registry mirror.
///
/// Teardown removes the local entry before the mirror, so if the
/// connection is still local and open after the write, any teardown that
/// follows will remove the new mirror too. Otherwise the write lost a race
/// with teardown and is undone here. Returns whether a mirror remains.
pub async fn reconcile_mirror(
    gateway: &ConnectionGateway,
    conn: &Connection,
) -> Result<bool, RegistryError> {
    gateway.register_mirror(conn).await?;
    if gateway.local().contains(&conn.id) && conn.is_open() {
        return Ok(true);
    }
    debug!(connection_id = %conn.id, "connection closed during reconcile, removing mirror");
    gateway.registry().unregister(&conn.id).await?;
    Ok(false)
}

/// Sweep every `interval` until `cancel` fires.
pub fn start_sweep_task(
    gateway: Arc<ConnectionGateway>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = sweep_stale_connections(&gateway).await;
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}
