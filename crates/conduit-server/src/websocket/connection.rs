//! Live client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_core::{CloseCode, ConnectionId, Identity};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::rate_limit::RateLimiter;

/// A frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A text message.
    Text(Arc<String>),
    /// A heartbeat ping.
    Ping,
}

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted and serving.
    Open = 0,
    /// Teardown has started; no new work is accepted.
    Closing = 1,
    /// Fully removed.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One accepted client socket, owned by this instance.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Claims from the session validator.
    pub identity: Identity,
    /// Wall-clock handshake time.
    pub connected_at: DateTime<Utc>,
    opened_at: Instant,
    channel: Mutex<String>,
    state: AtomicU8,
    /// Send side of the writer task's frame queue.
    tx: mpsc::Sender<OutboundFrame>,
    last_heartbeat: Mutex<(Instant, DateTime<Utc>)>,
    last_activity: Mutex<DateTime<Utc>>,
    pongs: watch::Sender<u64>,
    /// Frames dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
    close_code: Mutex<Option<CloseCode>>,
    heartbeat_running: AtomicBool,
    rate: Mutex<RateLimiter>,
    cancel: CancellationToken,
}

impl Connection {
    /// A new open connection on `channel` writing to `tx`.
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        channel: impl Into<String>,
        tx: mpsc::Sender<OutboundFrame>,
        rate: RateLimiter,
    ) -> Self {
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            id,
            identity,
            connected_at: wall,
            opened_at: now,
            channel: Mutex::new(channel.into()),
            state: AtomicU8::new(ConnectionState::Open as u8),
            tx,
            last_heartbeat: Mutex::new((now, wall)),
            last_activity: Mutex::new(wall),
            pongs: watch::Sender::new(0),
            dropped_messages: AtomicU64::new(0),
            close_code: Mutex::new(None),
            heartbeat_running: AtomicBool::new(false),
            rate: Mutex::new(rate),
            cancel: CancellationToken::new(),
        }
    }

    /// Current logical channel.
    pub fn channel(&self) -> String {
        self.channel.lock().clone()
    }

    /// Switch channel, returning the previous one.
    pub fn set_channel(&self, channel: impl Into<String>) -> String {
        std::mem::replace(&mut *self.channel.lock(), channel.into())
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        self.enqueue(OutboundFrame::Text(message))
    }

    /// Serialize a JSON value and queue it.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Queue a heartbeat ping.
    pub fn send_ping(&self) -> bool {
        self.enqueue(OutboundFrame::Ping)
    }

    fn enqueue(&self, frame: OutboundFrame) -> bool {
        if self.state() == ConnectionState::Open && self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record an answered heartbeat (pong). Also counts as activity.
    pub fn mark_heartbeat(&self) {
        let wall = Utc::now();
        *self.last_heartbeat.lock() = (Instant::now(), wall);
        *self.last_activity.lock() = wall;
        self.pongs.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Time since the last heartbeat (or the handshake).
    pub fn heartbeat_elapsed(&self) -> Duration {
        self.last_heartbeat.lock().0.elapsed()
    }

    /// Wall-clock time of the last heartbeat (or the handshake).
    pub fn last_heartbeat_at(&self) -> DateTime<Utc> {
        self.last_heartbeat.lock().1
    }

    /// Watch that ticks on every pong.
    pub fn subscribe_pongs(&self) -> watch::Receiver<u64> {
        self.pongs.subscribe()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    /// Wall-clock time of the last inbound frame (or the handshake).
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    /// Admit one inbound message against the rate limit.
    pub fn allow_message(&self) -> bool {
        self.rate.lock().check()
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move OPEN → CLOSING, recording the close frame to send. Returns
    /// `false` if teardown had already started.
    pub fn begin_close(&self, code: Option<CloseCode>) -> bool {
        let won = self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            *self.close_code.lock() = code;
            self.cancel.cancel();
        }
        won
    }

    /// Mark teardown complete.
    pub fn mark_closed(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Close frame chosen at teardown, if the server initiated it.
    pub fn close_code(&self) -> Option<CloseCode> {
        *self.close_code.lock()
    }

    /// Cancellation for every per-connection task.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves once teardown starts.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Record whether a heartbeat task is monitoring this connection.
    pub fn set_heartbeat_running(&self, running: bool) {
        self.heartbeat_running.store(running, Ordering::Release);
    }

    /// Whether a heartbeat task is monitoring this connection.
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat_running.load(Ordering::Acquire)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}
