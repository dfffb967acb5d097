//! Heartbeat ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// A ping could not be queued or no pong arrived in time.
    Failed,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run heartbeat pings for a connection.
///
/// Every `interval` a ping is queued and the task waits up to `timeout` for
/// a pong. The first ping goes out one full interval after the handshake.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut pongs = connection.subscribe_pongs();
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }

        // Ignore pongs that arrived unprompted since the last round.
        let _ = pongs.borrow_and_update();
        if !connection.send_ping() {
            return HeartbeatResult::Failed;
        }

        tokio::select! {
            answered = time::timeout(timeout, pongs.changed()) => {
                if !matches!(answered, Ok(Ok(()))) {
                    return HeartbeatResult::Failed;
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::OutboundFrame;
    use crate::websocket::rate_limit::RateLimiter;
    use conduit_core::{ConnectionId, Identity};
    use tokio::sync::mpsc;

    fn make_connection(cap: usize) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(cap);
        let conn = Connection::new(
            ConnectionId::from("hb_conn"),
            Identity::user("alice"),
            "guide",
            tx,
            RateLimiter::new(10, 100),
        );
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let (conn, _rx) = make_connection(8);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(conn, Duration::from_secs(100), Duration::from_secs(10), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_without_pong() {
        let (conn, mut rx) = make_connection(8);
        let started = time::Instant::now();

        let result = run_heartbeat(
            conn,
            Duration::from_secs(30),
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::Failed);
        assert_eq!(started.elapsed(), Duration::from_secs(40));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_when_ping_cannot_be_queued() {
        let (conn, rx) = make_connection(8);
        drop(rx);

        let result = run_heartbeat(
            conn,
            Duration::from_secs(30),
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn answered_pings_keep_running() {
        let (conn, mut rx) = make_connection(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Duration::from_secs(30),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        for _ in 0..5 {
            assert_eq!(rx.recv().await, Some(OutboundFrame::Ping));
            conn.mark_heartbeat();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pong_does_not_count() {
        let (conn, mut rx) = make_connection(8);
        // A pong before any ping must not satisfy the first round.
        conn.mark_heartbeat();

        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Duration::from_secs(30),
            Duration::from_secs(10),
            CancellationToken::new(),
        ));

        assert_eq!(rx.recv().await, Some(OutboundFrame::Ping));
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Failed);
    }

    #[test]
    fn heartbeat_result_equality() {
        assert_eq!(HeartbeatResult::Failed, HeartbeatResult::Failed);
        assert_ne!(HeartbeatResult::Failed, HeartbeatResult::Cancelled);
    }
}
